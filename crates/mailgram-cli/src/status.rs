//! `mailgram status` — show configuration and sync state.
//!
//! - Config path and the settings still missing
//! - Cursor (last bridged UID) and conversation count
//! - Which credential backend holds each secret

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use mailgram_core::blob::EncryptedBlobStore;
use mailgram_core::config::{get_config_path, load_config};
use mailgram_core::conversation::ConversationMap;
use mailgram_core::credentials::{CredentialKey, CredentialStore};
use mailgram_core::cursor::UidCursorStore;
use mailgram_core::utils::{get_conversations_path, get_credentials_path, get_cursor_path};

use crate::helpers::mark;
use crate::onboard::missing_settings;

/// Run the status command.
pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(get_config_path);
    let config = load_config(Some(&path));

    println!();
    println!("{}", "📬 Mailgram Status".cyan().bold());
    println!();

    // Config
    println!(
        "  {:<18} {}",
        "Config:".bold(),
        mark(path.exists(), &path.display().to_string())
    );
    let missing = missing_settings(&config);
    if !missing.is_empty() {
        println!(
            "  {:<18} {}",
            "Missing:".bold(),
            missing.join(", ").red()
        );
    }
    println!("  {:<18} {}", "Account:".bold(), config.account_id());
    println!("  {:<18} {}", "Mailbox:".bold(), config.sync.mailbox);

    // Sync state
    println!();
    let cursor = UidCursorStore::new(get_cursor_path());
    let cursor_line = if cursor.exists() {
        format!("UID {}", cursor.load().await)
    } else {
        "not seeded (first run will skip existing mail)"
            .dimmed()
            .to_string()
    };
    println!("  {:<18} {}", "Cursor:".bold(), cursor_line);

    let conversations = ConversationMap::load(EncryptedBlobStore::new(
        get_conversations_path(),
        config.account_id(),
    ));
    println!(
        "  {:<18} {}",
        "Conversations:".bold(),
        conversations.len()
    );

    // Credentials
    println!();
    let credentials =
        CredentialStore::with_default_backends(config.account_id(), get_credentials_path());
    println!(
        "  {:<18} {}",
        "Credential store:".bold(),
        credentials.backend_names().join(" → ").dimmed()
    );
    let secrets = [
        ("IMAP password", config.imap.password.as_str(), CredentialKey::ImapPassword),
        ("SMTP password", config.smtp.password.as_str(), CredentialKey::SmtpPassword),
        ("Telegram token", config.telegram.token.as_str(), CredentialKey::TelegramToken),
        ("Classifier key", config.classifier.api_key.as_str(), CredentialKey::ClassifierApiKey),
    ];
    for (label, configured, key) in secrets {
        let status = if !configured.is_empty() {
            mark(true, "(config file)")
        } else {
            match credentials.load_with_source(key) {
                Some((_, backend)) => mark(true, &format!("({backend})")),
                None => format!("{}", "· not set".dimmed()),
            }
        };
        println!("    {:<20} {}", label, status);
    }

    println!();
    let classifier = if config.classifier.enabled {
        format!("{} ({})", "on".green(), config.classifier.model)
    } else {
        format!("{}", "off".dimmed())
    };
    println!("  {:<18} {}", "Classifier:".bold(), classifier);
    println!();

    Ok(())
}
