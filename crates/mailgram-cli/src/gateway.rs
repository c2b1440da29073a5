//! Gateway — wires the sync core to the chat front end.
//!
//! Startup sequence:
//! 1. Resolve credentials (config first, then keyring / encrypted file)
//! 2. Build the shared mail session, cursor and conversation map
//! 3. Build the chat front end, the bridge and the mailbox watcher
//! 4. Run watcher + bridge inbound loop + front end until Ctrl+C
//! 5. Stop in reverse order, then close the mail session

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use mailgram_bridge::{BridgeSettings, ChatFrontend, ConversationBridge};
use mailgram_classifier::{Classifier, HttpClassifier};
use mailgram_core::blob::EncryptedBlobStore;
use mailgram_core::bus::MessageBus;
use mailgram_core::config::Config;
use mailgram_core::conversation::ConversationMap;
use mailgram_core::credentials::{CredentialKey, CredentialStore};
use mailgram_core::cursor::UidCursorStore;
use mailgram_core::utils::{get_conversations_path, get_credentials_path, get_cursor_path};
use mailgram_mail::{
    ConnectionManager, ConnectionPolicy, ImapTransport, MailSender, MailboxWatcher,
    SharedSession, SmtpSender, WatcherConfig,
};

use crate::helpers;

/// Everything the sync core needs, built from config.
pub struct Services {
    pub session: Arc<SharedSession>,
    pub cursor: Arc<UidCursorStore>,
    pub conversations: Arc<ConversationMap>,
    pub sender: Arc<dyn MailSender>,
    pub classifier: Option<Arc<dyn Classifier>>,
    pub credentials: CredentialStore,
}

impl Services {
    pub fn build(config: &Config) -> Result<Self> {
        anyhow::ensure!(
            config.imap.is_configured(),
            "IMAP host and username are not configured; run `mailgram onboard`"
        );

        let credentials =
            CredentialStore::with_default_backends(config.account_id(), get_credentials_path());

        let imap_password = credentials
            .resolve(&config.imap.password, CredentialKey::ImapPassword)
            .context("no IMAP password stored; run `mailgram onboard`")?;

        let sender = smtp_sender(config, &credentials, &imap_password);
        let conn = ConnectionManager::new(
            Box::new(ImapTransport::new(&config.imap, imap_password)),
            ConnectionPolicy::from_sync(&config.sync),
        );

        let conversations = ConversationMap::load(EncryptedBlobStore::new(
            get_conversations_path(),
            config.account_id(),
        ));

        let classifier = build_classifier(config, &credentials);

        Ok(Self {
            session: Arc::new(SharedSession::new(conn)),
            cursor: Arc::new(UidCursorStore::new(get_cursor_path())),
            conversations: Arc::new(conversations),
            sender: Arc::new(sender),
            classifier,
            credentials,
        })
    }
}

/// SMTP sender; login falls back to the IMAP username and password.
pub fn smtp_sender(
    config: &Config,
    credentials: &CredentialStore,
    imap_password: &str,
) -> SmtpSender {
    let username = if config.smtp.username.is_empty() {
        config.imap.username.clone()
    } else {
        config.smtp.username.clone()
    };
    let password = credentials
        .resolve(&config.smtp.password, CredentialKey::SmtpPassword)
        .unwrap_or_else(|| imap_password.to_string());
    SmtpSender::new(
        &config.smtp,
        username,
        password,
        config.from_address(),
        config.account.display_name.clone(),
    )
}

/// The classifier, if enabled and keyed. Absence only disables annotations.
fn build_classifier(config: &Config, credentials: &CredentialStore) -> Option<Arc<dyn Classifier>> {
    if !config.classifier.enabled {
        return None;
    }
    let Some(key) = credentials.resolve(&config.classifier.api_key, CredentialKey::ClassifierApiKey)
    else {
        warn!("classifier enabled but no API key found, continuing without it");
        return None;
    };
    match HttpClassifier::new(&config.classifier, key) {
        Ok(c) => Some(Arc::new(c)),
        Err(e) => {
            warn!(error = %e, "failed to build classifier, continuing without it");
            None
        }
    }
}

#[cfg(feature = "telegram")]
fn build_frontend(
    config: &Config,
    credentials: &CredentialStore,
    bus: Arc<MessageBus>,
) -> Result<Arc<dyn ChatFrontend>> {
    use mailgram_bridge::TelegramFrontend;

    let token = credentials
        .resolve(&config.telegram.token, CredentialKey::TelegramToken)
        .context("no Telegram bot token stored; run `mailgram onboard`")?;
    anyhow::ensure!(
        config.telegram.chat_id != 0,
        "telegram.chatId is not configured"
    );
    Ok(Arc::new(TelegramFrontend::new(&config.telegram, &token, bus)))
}

#[cfg(not(feature = "telegram"))]
fn build_frontend(
    _config: &Config,
    _credentials: &CredentialStore,
    _bus: Arc<MessageBus>,
) -> Result<Arc<dyn ChatFrontend>> {
    anyhow::bail!("this build has no chat front end; rebuild with `--features telegram`")
}

struct Wired {
    services: Services,
    frontend: Arc<dyn ChatFrontend>,
    bridge: Arc<ConversationBridge>,
    watcher: Arc<MailboxWatcher>,
}

fn wire(config: &Config, bus: Arc<MessageBus>) -> Result<Wired> {
    let services = Services::build(config)?;
    let frontend = build_frontend(config, &services.credentials, bus)?;

    let bridge = ConversationBridge::new(
        frontend.clone(),
        services.conversations.clone(),
        services.session.clone(),
        services.sender.clone(),
        services.classifier.clone(),
        BridgeSettings::from_config(config),
    );
    let watcher = Arc::new(MailboxWatcher::new(
        services.session.clone(),
        services.cursor.clone(),
        bridge.clone(),
        WatcherConfig::from_sync(&config.sync),
    ));

    Ok(Wired {
        services,
        frontend,
        bridge,
        watcher,
    })
}

/// `mailgram run` — bridge until Ctrl+C.
pub async fn run(config: Config) -> Result<()> {
    helpers::print_banner();
    println!("  Mode: Bridge");
    println!();

    let bus = Arc::new(MessageBus::new(100));
    let Wired {
        services,
        frontend,
        bridge,
        watcher,
    } = wire(&config, bus.clone())?;

    info!(
        account = config.account_id(),
        mailbox = %config.sync.mailbox,
        frontend = frontend.name(),
        threads = frontend.supports_threads(),
        classifier = services.classifier.is_some(),
        "bridge starting"
    );
    println!("  Account:    {}", config.account_id());
    println!("  Mailbox:    {}", config.sync.mailbox);
    println!("  Front end:  {}", frontend.name());
    println!(
        "  Classifier: {}",
        if services.classifier.is_some() { "on" } else { "off" }
    );
    println!();
    println!("  Ctrl+C to stop");
    println!();

    let watcher_task = tokio::spawn(watcher.clone().run());
    let inbound_task = tokio::spawn(bridge.clone().run_inbound(bus));

    tokio::select! {
        result = frontend.start() => {
            if let Err(e) = result {
                error!(error = %e, "front end stopped with an error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("  Shutting down...");
            info!("received Ctrl+C, shutting down");
        }
    }

    watcher.stop();
    bridge.stop();
    if let Err(e) = frontend.stop().await {
        warn!(error = %e, "front end did not stop cleanly");
    }
    services.session.shutdown().await;
    let _ = watcher_task.await;
    let _ = inbound_task.await;

    println!("  Bridge stopped. Goodbye!");
    Ok(())
}

/// `mailgram sync` — one pass, then exit.
pub async fn sync(config: Config) -> Result<()> {
    let bus = Arc::new(MessageBus::new(1));
    let Wired {
        services, watcher, ..
    } = wire(&config, bus)?;

    let result = watcher.sync_once().await;
    services.session.shutdown().await;

    match result.context("sync pass failed")? {
        Some(report) => helpers::print_report(&report),
        None => println!("  A sync pass is already running."),
    }
    Ok(())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
