//! Configuration schema.
//!
//! Hierarchy: `Config` → `AccountConfig`, `ImapConfig`, `SmtpConfig`,
//! `TelegramConfig`, `SyncConfig`, `BridgeConfig`, `ClassifierConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! We use `#[serde(rename_all = "camelCase")]` to handle the conversion.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration — loaded from `~/.mailgram/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub account: AccountConfig,
    pub imap: ImapConfig,
    pub smtp: SmtpConfig,
    pub telegram: TelegramConfig,
    pub sync: SyncConfig,
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

impl Config {
    /// Stable, non-secret identity of the bridged account.
    ///
    /// Used as the credential-store user and as key material for the
    /// encrypted blobs. Falls back to the IMAP username.
    pub fn account_id(&self) -> &str {
        if !self.account.email.is_empty() {
            &self.account.email
        } else {
            &self.imap.username
        }
    }

    /// Address used in the `From:` header of outgoing mail.
    pub fn from_address(&self) -> &str {
        if !self.smtp.from_address.is_empty() {
            &self.smtp.from_address
        } else if !self.smtp.username.is_empty() {
            &self.smtp.username
        } else {
            self.account_id()
        }
    }
}

// ─────────────────────────────────────────────
// Account
// ─────────────────────────────────────────────

/// The single bridged mailbox owner.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountConfig {
    /// Primary address of the account.
    pub email: String,
    /// Display name for outgoing mail (optional).
    pub display_name: String,
}

// ─────────────────────────────────────────────
// Mail servers
// ─────────────────────────────────────────────

/// IMAP (inbound) server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImapConfig {
    /// IMAP server hostname.
    pub host: String,
    /// IMAP server port (default 993 for IMAPS).
    pub port: u16,
    /// IMAP login username.
    pub username: String,
    /// IMAP login password. Empty = resolve through the credential store.
    pub password: String,
    /// Use IMAPS (TLS from the start). Default true.
    pub use_ssl: bool,
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 993,
            username: String::new(),
            password: String::new(),
            use_ssl: true,
        }
    }
}

impl ImapConfig {
    /// Whether host and username are present.
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && !self.username.is_empty()
    }
}

/// SMTP (outbound) server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SmtpConfig {
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port (default 587 for STARTTLS).
    pub port: u16,
    /// SMTP login username. Empty = same as IMAP.
    pub username: String,
    /// SMTP login password. Empty = same as IMAP.
    pub password: String,
    /// Use STARTTLS (default true).
    pub use_tls: bool,
    /// Use implicit TLS/SMTPS (default false, for port 465).
    pub use_ssl: bool,
    /// Sender address for outbound; falls back to `username`.
    pub from_address: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            username: String::new(),
            password: String::new(),
            use_tls: true,
            use_ssl: false,
            from_address: String::new(),
        }
    }
}

// ─────────────────────────────────────────────
// Chat front end
// ─────────────────────────────────────────────

/// Telegram front-end config.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelegramConfig {
    /// Bot token from @BotFather. Empty = resolve through the credential store.
    pub token: String,
    /// Chat that receives bridged mail (a forum-enabled supergroup or a DM).
    pub chat_id: i64,
    /// Create one forum topic per conversation (requires a forum chat).
    pub use_topics: bool,
    /// Allowed user IDs / usernames. Empty = only members of `chat_id`.
    pub allowed_users: Vec<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            chat_id: 0,
            use_topics: true,
            allowed_users: Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────
// Sync core
// ─────────────────────────────────────────────

/// Mailbox watcher and connection policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Folder to watch (default "INBOX").
    pub mailbox: String,
    /// Periodic pull interval in seconds (minimum 5).
    pub poll_interval_secs: u64,
    /// Push (IDLE) session is torn down and re-issued after this many seconds.
    pub idle_refresh_secs: u64,
    /// Delay before restarting a push session that failed.
    pub idle_restart_delay_secs: u64,
    /// First reconnect delay in milliseconds.
    pub backoff_initial_ms: u64,
    /// Reconnect delay cap in milliseconds.
    pub backoff_max_ms: u64,
    /// Bounded wait for a single message fetch.
    pub fetch_timeout_secs: u64,
    /// Bounded wait for connect / select / search.
    pub command_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mailbox: "INBOX".to_string(),
            poll_interval_secs: 60,
            idle_refresh_secs: 25 * 60,
            idle_restart_delay_secs: 5,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 60_000,
            fetch_timeout_secs: 10,
            command_timeout_secs: 120,
        }
    }
}

/// Minimum poll interval in seconds.
const MIN_POLL_INTERVAL_SECS: u64 = 5;

impl SyncConfig {
    /// Effective poll interval (minimum 5 seconds).
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(MIN_POLL_INTERVAL_SECS))
    }

    pub fn idle_refresh(&self) -> Duration {
        Duration::from_secs(self.idle_refresh_secs.max(1))
    }

    pub fn idle_restart_delay(&self) -> Duration {
        Duration::from_secs(self.idle_restart_delay_secs)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms.max(1))
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms.max(self.backoff_initial_ms).max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }
}

/// Rendering and inbound-command settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    /// Maximum characters per chat message (Telegram limit is 4096).
    pub max_chunk_chars: usize,
    /// Quiet period that closes a burst of album fragments.
    pub album_debounce_ms: u64,
    /// Forward mail attachments as documents.
    pub forward_attachments: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 4096,
            album_debounce_ms: 1_000,
            forward_attachments: true,
        }
    }
}

impl BridgeConfig {
    pub fn album_debounce(&self) -> Duration {
        Duration::from_millis(self.album_debounce_ms)
    }
}

// ─────────────────────────────────────────────
// Classifier
// ─────────────────────────────────────────────

/// Optional content classifier (OpenAI-compatible chat completions API).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassifierConfig {
    pub enabled: bool,
    /// API base URL (e.g. `"https://api.openai.com/v1"`).
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ClassifierConfig {
    /// Whether the classifier should be wired in.
    pub fn is_configured(&self) -> bool {
        self.enabled && !self.api_key.is_empty()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
