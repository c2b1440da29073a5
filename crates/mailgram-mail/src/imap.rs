//! Minimal async IMAP client and the `MailTransport` built on it.
//!
//! Raw TCP + TLS (rustls with webpki roots). Supports only what the sync
//! core needs: LOGIN, SELECT, UID SEARCH, UID FETCH, IDLE/DONE, LOGOUT.
//!
//! Line reads go through a persistent buffer with `read_until`, so a read
//! abandoned by `tokio::select!` (e.g. an IDLE wait interrupted by the push
//! gate) loses no bytes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mailgram_core::config::schema::ImapConfig;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tracing::{debug, info, trace};

use crate::error::MailError;
use crate::transport::{gate_closed, IdleOutcome, MailTransport, PushGate};

// ─────────────────────────────────────────────
// Protocol client
// ─────────────────────────────────────────────

/// Async read+write stream marker.
pub trait ImapStream: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}
impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send> ImapStream for T {}

/// One IMAP connection.
pub struct ImapClient {
    reader: BufReader<ReadHalf<Box<dyn ImapStream>>>,
    writer: WriteHalf<Box<dyn ImapStream>>,
    /// Partial line carried across cancelled reads.
    line_buf: Vec<u8>,
    tag_counter: u32,
}

impl ImapClient {
    /// Connect to an IMAP server (plain or IMAPS/TLS) and read the greeting.
    pub async fn connect(host: &str, port: u16, use_ssl: bool) -> Result<Self, MailError> {
        let tcp = tokio::net::TcpStream::connect((host, port))
            .await
            .map_err(|e| MailError::Connect(format!("{host}:{port}: {e}")))?;

        let stream: Box<dyn ImapStream> = if use_ssl {
            let mut root_store = rustls::RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

            let config = rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();

            let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
            let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
                .map_err(|e| MailError::Connect(format!("invalid server name '{host}': {e}")))?;
            let tls = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| MailError::Connect(format!("TLS handshake with {host}: {e}")))?;
            Box::new(tls)
        } else {
            Box::new(tcp)
        };

        Self::from_stream(stream).await
    }

    /// Wrap an established stream and consume the server greeting.
    pub async fn from_stream(stream: Box<dyn ImapStream>) -> Result<Self, MailError> {
        let (read, write) = tokio::io::split(stream);
        let mut client = Self {
            reader: BufReader::new(read),
            writer: write,
            line_buf: Vec::new(),
            tag_counter: 0,
        };

        let greeting = client.read_line().await?;
        let upper = greeting.to_ascii_uppercase();
        if !upper.starts_with("* OK") && !upper.starts_with("* PREAUTH") {
            return Err(MailError::Connect(format!("unexpected greeting: {greeting}")));
        }
        debug!(greeting = %greeting, "IMAP connected");

        Ok(client)
    }

    /// Read a single CRLF-terminated line. Cancel-safe.
    async fn read_line(&mut self) -> Result<String, MailError> {
        let n = self.reader.read_until(b'\n', &mut self.line_buf).await?;
        if n == 0 || !self.line_buf.ends_with(b"\n") {
            return Err(MailError::Closed("server closed the connection".into()));
        }
        let line = String::from_utf8_lossy(&self.line_buf)
            .trim_end_matches(|c| c == '\r' || c == '\n')
            .to_string();
        self.line_buf.clear();
        trace!(line = %line, "S:");
        Ok(line)
    }

    /// Read exactly `n` bytes (literal payload).
    async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, MailError> {
        let mut buf = vec![0u8; n];
        self.reader.read_exact(&mut buf).await?;
        Ok(buf)
    }

    async fn write_line(&mut self, line: &str) -> Result<(), MailError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send a tagged IMAP command. Returns the tag.
    async fn send_command(&mut self, cmd: &str) -> Result<String, MailError> {
        self.tag_counter += 1;
        let tag = format!("A{:04}", self.tag_counter);
        self.write_line(&format!("{tag} {cmd}")).await?;
        Ok(tag)
    }

    /// Read responses until the tagged completion line.
    /// Returns (untagged_lines, tagged_status_line).
    async fn read_response(&mut self, tag: &str) -> Result<(Vec<String>, String), MailError> {
        let mut untagged = Vec::new();
        loop {
            let line = self.read_line().await?;
            if is_tagged(&line, tag) {
                return Ok((untagged, line));
            }
            if is_bye(&line) {
                return Err(MailError::Closed(line));
            }
            untagged.push(line);
        }
    }

    /// Run a simple command and require a tagged OK.
    async fn simple(&mut self, name: &str, cmd: &str) -> Result<Vec<String>, MailError> {
        let tag = self.send_command(cmd).await?;
        let (lines, status) = self.read_response(&tag).await?;
        if !status_ok(&status, &tag) {
            return Err(MailError::protocol(name, status));
        }
        Ok(lines)
    }

    /// LOGIN
    pub async fn login(&mut self, user: &str, pass: &str) -> Result<(), MailError> {
        let cmd = format!("LOGIN {} {}", quote(user), quote(pass));
        let tag = self.send_command(&cmd).await?;
        let (_, status) = self.read_response(&tag).await?;
        if !status_ok(&status, &tag) {
            return Err(MailError::Auth(status));
        }
        Ok(())
    }

    /// SELECT mailbox
    pub async fn select(&mut self, mailbox: &str) -> Result<(), MailError> {
        self.simple("SELECT", &format!("SELECT {}", quote(mailbox)))
            .await
            .map(|_| ())
    }

    /// UID SEARCH NOT DELETED
    pub async fn search_uids(&mut self) -> Result<Vec<u32>, MailError> {
        let lines = self.simple("UID SEARCH", "UID SEARCH NOT DELETED").await?;
        Ok(parse_search(&lines))
    }

    /// UID FETCH of the full message, leaving flags untouched.
    pub async fn fetch(&mut self, uid: u32) -> Result<Vec<u8>, MailError> {
        let tag = self
            .send_command(&format!("UID FETCH {uid} (BODY.PEEK[])"))
            .await?;

        let mut data: Option<Vec<u8>> = None;
        loop {
            let line = self.read_line().await?;

            if is_tagged(&line, &tag) {
                if !status_ok(&line, &tag) {
                    return Err(MailError::protocol("UID FETCH", line));
                }
                break;
            }
            if is_bye(&line) {
                return Err(MailError::Closed(line));
            }

            // * N FETCH (UID nnn BODY[] {size}
            if line.starts_with("* ") && line.to_ascii_uppercase().contains(" FETCH ") {
                if let Some(size) = literal_size(&line) {
                    let literal = self.read_exact(size).await?;
                    // Rest of the FETCH response after the literal, usually ")"
                    let _closing = self.read_line().await?;
                    if data.is_none() {
                        data = Some(literal);
                    }
                }
            }
        }

        data.ok_or(MailError::MissingMessage(uid))
    }

    /// IDLE until a change, the refresh period, or the gate closing.
    pub async fn idle(
        &mut self,
        refresh: Duration,
        gate: &mut PushGate,
    ) -> Result<IdleOutcome, MailError> {
        if !*gate.borrow() {
            return Ok(IdleOutcome::Interrupted);
        }

        let tag = self.send_command("IDLE").await?;
        loop {
            let line = self.read_line().await?;
            if line.starts_with('+') {
                break;
            }
            if is_tagged(&line, &tag) {
                return Err(MailError::protocol("IDLE", line));
            }
            if is_bye(&line) {
                return Err(MailError::Closed(line));
            }
        }
        debug!(refresh_secs = refresh.as_secs(), "IDLE started");

        let deadline = tokio::time::Instant::now() + refresh;
        let mut outcome = IdleOutcome::TimedOut;
        loop {
            tokio::select! {
                line = self.read_line() => {
                    let line = line?;
                    if is_bye(&line) {
                        return Err(MailError::Closed(line));
                    }
                    if is_mailbox_change(&line) {
                        debug!(line = %line, "IDLE change");
                        outcome = IdleOutcome::Changed;
                        break;
                    }
                }
                _ = gate_closed(gate) => {
                    outcome = IdleOutcome::Interrupted;
                    break;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    break;
                }
            }
        }

        self.write_line("DONE").await?;
        let (lines, status) = self.read_response(&tag).await?;
        if !status_ok(&status, &tag) {
            return Err(MailError::protocol("IDLE", status));
        }
        if outcome != IdleOutcome::Changed && lines.iter().any(|l| is_mailbox_change(l)) {
            outcome = IdleOutcome::Changed;
        }
        Ok(outcome)
    }

    /// LOGOUT
    pub async fn logout(&mut self) -> Result<(), MailError> {
        let tag = self.send_command("LOGOUT").await?;
        // Server sends * BYE before the tagged OK
        loop {
            let line = self.read_line().await?;
            if is_tagged(&line, &tag) {
                return Ok(());
            }
        }
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn is_tagged(line: &str, tag: &str) -> bool {
    line.strip_prefix(tag)
        .is_some_and(|rest| rest.starts_with(' '))
}

fn status_ok(line: &str, tag: &str) -> bool {
    line.strip_prefix(tag)
        .and_then(|rest| rest.split_whitespace().next())
        .is_some_and(|s| s.eq_ignore_ascii_case("OK"))
}

fn is_bye(line: &str) -> bool {
    line.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("* BYE"))
}

/// Untagged `EXISTS`, `EXPUNGE`, `RECENT` or `FETCH` (e.g. `* 12 EXISTS`).
fn is_mailbox_change(line: &str) -> bool {
    let mut parts = line.split_whitespace();
    if parts.next() != Some("*") {
        return false;
    }
    let Some(num) = parts.next() else {
        return false;
    };
    if num.parse::<u32>().is_err() {
        return false;
    }
    matches!(
        parts.next().map(|s| s.to_ascii_uppercase()).as_deref(),
        Some("EXISTS" | "EXPUNGE" | "RECENT" | "FETCH")
    )
}

/// Numbers from `* SEARCH 1 2 3` lines.
fn parse_search(lines: &[String]) -> Vec<u32> {
    lines
        .iter()
        .filter(|l| l.to_ascii_uppercase().starts_with("* SEARCH"))
        .flat_map(|l| l.split_whitespace().skip(2).filter_map(|s| s.parse().ok()))
        .collect()
}

/// Size of a trailing `{N}` literal marker.
fn literal_size(line: &str) -> Option<usize> {
    let start = line.rfind('{')?;
    let end = line.rfind('}')?;
    if end != line.len() - 1 || end <= start {
        return None;
    }
    line[start + 1..end].parse().ok()
}

// ─────────────────────────────────────────────
// ImapTransport
// ─────────────────────────────────────────────

/// `MailTransport` over `ImapClient`.
pub struct ImapTransport {
    host: String,
    port: u16,
    use_ssl: bool,
    username: String,
    password: String,
    client: Option<ImapClient>,
}

impl ImapTransport {
    /// Build from config with an already-resolved password.
    pub fn new(config: &ImapConfig, password: impl Into<String>) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            use_ssl: config.use_ssl,
            username: config.username.clone(),
            password: password.into(),
            client: None,
        }
    }

    fn client(&mut self) -> Result<&mut ImapClient, MailError> {
        self.client.as_mut().ok_or(MailError::NotConnected)
    }
}

#[async_trait]
impl MailTransport for ImapTransport {
    async fn connect(&mut self) -> Result<(), MailError> {
        self.close().await;
        let mut client = ImapClient::connect(&self.host, self.port, self.use_ssl).await?;
        client.login(&self.username, &self.password).await?;
        info!(host = %self.host, user = %self.username, "IMAP session authenticated");
        self.client = Some(client);
        Ok(())
    }

    async fn select(&mut self, mailbox: &str) -> Result<(), MailError> {
        self.client()?.select(mailbox).await
    }

    async fn search_uids(&mut self) -> Result<Vec<u32>, MailError> {
        self.client()?.search_uids().await
    }

    async fn fetch(&mut self, uid: u32) -> Result<Vec<u8>, MailError> {
        self.client()?.fetch(uid).await
    }

    async fn idle(
        &mut self,
        refresh: Duration,
        gate: &mut PushGate,
    ) -> Result<IdleOutcome, MailError> {
        self.client()?.idle(refresh, gate).await
    }

    async fn close(&mut self) {
        if let Some(mut client) = self.client.take() {
            let logout = tokio::time::timeout(Duration::from_secs(5), client.logout()).await;
            if let Ok(Err(e)) = logout {
                debug!(error = %e, "IMAP logout error (non-fatal)");
            }
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
