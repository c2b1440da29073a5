//! `mailgram onboard` — initialize configuration and credentials.
//!
//! - Creates or updates `~/.mailgram/config.json`
//! - Stores passwords and the bot token in the credential store
//!   (OS keyring, else the encrypted file)
//! - Checks the IMAP login with a bounded number of attempts, then the SMTP
//!   connection

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use mailgram_core::config::schema::ImapConfig;
use mailgram_core::config::{get_config_path, load_config, save_config, Config};
use mailgram_core::credentials::{CredentialKey, CredentialStore};
use mailgram_core::utils::get_credentials_path;
use mailgram_mail::{ConnectionManager, ConnectionPolicy, ImapTransport, SharedSession, SmtpSender};

use crate::gateway::smtp_sender;
use crate::helpers::mark;

/// Login attempts before onboarding reports the IMAP settings as wrong.
const VALIDATION_ATTEMPTS: u32 = 3;

/// Run the onboard command.
pub async fn run(config_path: Option<&Path>) -> Result<()> {
    println!();
    println!("{}", "📬 Mailgram — Setup".cyan().bold());
    println!("{}", "  Press Enter to keep the value in brackets.".dimmed());
    println!();

    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(get_config_path);
    let mut config = load_config(Some(&path));
    let mut rl = DefaultEditor::new().context("failed to open terminal prompt")?;

    // 1. Settings
    config.account.email = ask(&mut rl, "Email address", &config.account.email)?;
    config.imap.host = ask(&mut rl, "IMAP host", &config.imap.host)?;
    let username_default = if config.imap.username.is_empty() {
        config.account.email.clone()
    } else {
        config.imap.username.clone()
    };
    config.imap.username = ask(&mut rl, "IMAP username", &username_default)?;
    let smtp_default = if config.smtp.host.is_empty() {
        guess_smtp_host(&config.imap.host)
    } else {
        config.smtp.host.clone()
    };
    config.smtp.host = ask(&mut rl, "SMTP host", &smtp_default)?;
    let chat = ask(&mut rl, "Telegram chat id", &config.telegram.chat_id.to_string())?;
    config.telegram.chat_id = chat
        .parse()
        .with_context(|| format!("not a chat id: {chat}"))?;

    save_config(&config, Some(&path))
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("  {}", mark(true, &format!("config saved to {}", path.display())));

    // 2. Secrets
    let credentials =
        CredentialStore::with_default_backends(config.account_id(), get_credentials_path());
    store_secret(&mut rl, &credentials, "IMAP password", CredentialKey::ImapPassword)?;
    store_secret(&mut rl, &credentials, "Telegram bot token", CredentialKey::TelegramToken)?;
    if config.classifier.enabled && config.classifier.api_key.is_empty() {
        store_secret(&mut rl, &credentials, "Classifier API key", CredentialKey::ClassifierApiKey)?;
    }

    // 3. Server checks
    match credentials.resolve(&config.imap.password, CredentialKey::ImapPassword) {
        Some(password) => {
            match validate_imap(&config.imap, &password).await {
                Ok(()) => println!("  {}", mark(true, "IMAP login works")),
                Err(e) => println!("  {}", mark(false, &format!("IMAP login failed: {e:#}"))),
            }
            match validate_smtp(&smtp_sender(&config, &credentials, &password)).await {
                Ok(()) => println!("  {}", mark(true, "SMTP server reachable")),
                Err(e) => println!("  {}", mark(false, &format!("SMTP check failed: {e:#}"))),
            }
        }
        None => println!("  {}", mark(false, "no IMAP password stored; servers not checked")),
    }

    println!();
    println!(
        "{}",
        "  Setup complete! Run `mailgram run` to start the bridge.".green()
    );
    println!();
    Ok(())
}

/// Log in and select the inbox, giving up after [`VALIDATION_ATTEMPTS`].
pub async fn validate_imap(imap: &ImapConfig, password: &str) -> Result<()> {
    anyhow::ensure!(imap.is_configured(), "IMAP host and username are required");

    let policy = ConnectionPolicy::default().with_max_attempts(VALIDATION_ATTEMPTS);
    let session = SharedSession::new(ConnectionManager::new(
        Box::new(ImapTransport::new(imap, password)),
        policy,
    ));
    let result = {
        let mut conn = session.exclusive().await;
        conn.select("INBOX").await
    };
    session.shutdown().await;
    result.context("could not open INBOX")
}

/// Open an authenticated SMTP connection and close it again.
pub async fn validate_smtp(sender: &SmtpSender) -> Result<()> {
    sender.verify().await.context("could not reach the SMTP server")
}

/// Prompt for a secret and store it. Empty input keeps what is stored.
fn store_secret(
    rl: &mut DefaultEditor,
    credentials: &CredentialStore,
    label: &str,
    key: CredentialKey,
) -> Result<()> {
    let stored = credentials.load_with_source(key);
    let hint = match &stored {
        Some((_, backend)) => format!("stored in {backend}"),
        None => "not set".to_string(),
    };
    let answer = ask(rl, label, "")
        .map(|a| a.trim().to_string())
        .with_context(|| format!("failed to read {label}"))?;
    if answer.is_empty() {
        println!("  {}", mark(stored.is_some(), &format!("{label}: {hint}")));
        return Ok(());
    }

    match credentials.save(key, &answer) {
        Some(backend) => println!("  {}", mark(true, &format!("{label} stored in {backend}"))),
        None => println!(
            "  {}",
            mark(false, &format!("{label} could not be stored; set it in the config file"))
        ),
    }
    Ok(())
}

/// Read one line; empty input keeps `current`.
fn ask(rl: &mut DefaultEditor, label: &str, current: &str) -> Result<String> {
    let prompt = if current.is_empty() {
        format!("  {label}: ")
    } else {
        format!("  {label} [{current}]: ")
    };
    match rl.readline(&prompt) {
        Ok(line) => Ok(pick(&line, current)),
        Err(ReadlineError::Interrupted | ReadlineError::Eof) => anyhow::bail!("setup aborted"),
        Err(e) => Err(e).context("failed to read input"),
    }
}

fn pick(answer: &str, current: &str) -> String {
    let answer = answer.trim();
    if answer.is_empty() {
        current.to_string()
    } else {
        answer.to_string()
    }
}

/// `imap.example.com` → `smtp.example.com`.
fn guess_smtp_host(imap_host: &str) -> String {
    match imap_host.strip_prefix("imap.") {
        Some(domain) => format!("smtp.{domain}"),
        None => String::new(),
    }
}

/// Whether `config` has everything `mailgram run` needs apart from secrets.
pub fn missing_settings(config: &Config) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if config.imap.host.is_empty() {
        missing.push("imap.host");
    }
    if config.imap.username.is_empty() {
        missing.push("imap.username");
    }
    if config.smtp.host.is_empty() {
        missing.push("smtp.host");
    }
    if config.telegram.chat_id == 0 {
        missing.push("telegram.chatId");
    }
    missing
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_keeps_current_on_empty() {
        assert_eq!(pick("  ", "imap.example.com"), "imap.example.com");
        assert_eq!(pick(" new.host ", "old.host"), "new.host");
    }

    #[test]
    fn guess_smtp_from_imap() {
        assert_eq!(guess_smtp_host("imap.fastmail.com"), "smtp.fastmail.com");
        assert_eq!(guess_smtp_host("mail.example.com"), "");
    }

    #[test]
    fn missing_settings_on_defaults() {
        let missing = missing_settings(&Config::default());
        assert_eq!(
            missing,
            vec!["imap.host", "imap.username", "smtp.host", "telegram.chatId"]
        );
    }

    #[tokio::test]
    async fn validate_rejects_unconfigured_smtp() {
        let sender = SmtpSender::new(
            &mailgram_core::config::schema::SmtpConfig::default(),
            "me@example.com",
            "pw",
            "me@example.com",
            "",
        );
        let err = validate_smtp(&sender).await.unwrap_err();
        assert!(format!("{err:#}").contains("SMTP host not configured"));
    }

    #[tokio::test]
    async fn validate_rejects_unconfigured_imap() {
        let err = validate_imap(&ImapConfig::default(), "pw").await.unwrap_err();
        assert!(err.to_string().contains("required"));
    }
}
