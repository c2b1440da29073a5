//! Config loader — reads `~/.mailgram/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.mailgram/config.json`
//! 3. Environment variables `MAILGRAM_<SECTION>__<FIELD>` (override JSON)

use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::schema::Config;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    load_config_from_path(&config_path)
}

/// Load config from a specific file path.
fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("no config file found at {}, using defaults", path.display());
        return apply_env_overrides(Config::default());
    }

    debug!("loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read config file");
            return apply_env_overrides(Config::default());
        }
    };

    let config: Config = match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "failed to parse config JSON");
            return apply_env_overrides(Config::default());
        }
    };

    apply_env_overrides(config)
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;

    std::fs::write(&config_path, json)?;
    debug!("config saved to {}", config_path.display());
    Ok(())
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Env var format: `MAILGRAM_<SECTION>__<FIELD>` (double underscore as delimiter),
/// e.g. `MAILGRAM_IMAP__HOST`, `MAILGRAM_TELEGRAM__TOKEN`,
/// `MAILGRAM_SYNC__POLL_INTERVAL_SECS`. Unparseable numbers are ignored.
fn apply_env_overrides(mut config: Config) -> Config {
    // Account
    set_string(&mut config.account.email, "ACCOUNT__EMAIL");
    set_string(&mut config.account.display_name, "ACCOUNT__DISPLAY_NAME");

    // IMAP
    set_string(&mut config.imap.host, "IMAP__HOST");
    set_parsed(&mut config.imap.port, "IMAP__PORT");
    set_string(&mut config.imap.username, "IMAP__USERNAME");
    set_string(&mut config.imap.password, "IMAP__PASSWORD");
    set_bool(&mut config.imap.use_ssl, "IMAP__USE_SSL");

    // SMTP
    set_string(&mut config.smtp.host, "SMTP__HOST");
    set_parsed(&mut config.smtp.port, "SMTP__PORT");
    set_string(&mut config.smtp.username, "SMTP__USERNAME");
    set_string(&mut config.smtp.password, "SMTP__PASSWORD");
    set_bool(&mut config.smtp.use_tls, "SMTP__USE_TLS");
    set_bool(&mut config.smtp.use_ssl, "SMTP__USE_SSL");
    set_string(&mut config.smtp.from_address, "SMTP__FROM_ADDRESS");

    // Telegram
    set_string(&mut config.telegram.token, "TELEGRAM__TOKEN");
    set_parsed(&mut config.telegram.chat_id, "TELEGRAM__CHAT_ID");
    set_bool(&mut config.telegram.use_topics, "TELEGRAM__USE_TOPICS");

    // Sync
    set_string(&mut config.sync.mailbox, "SYNC__MAILBOX");
    set_parsed(&mut config.sync.poll_interval_secs, "SYNC__POLL_INTERVAL_SECS");
    set_parsed(&mut config.sync.idle_refresh_secs, "SYNC__IDLE_REFRESH_SECS");
    set_parsed(
        &mut config.sync.idle_restart_delay_secs,
        "SYNC__IDLE_RESTART_DELAY_SECS",
    );
    set_parsed(&mut config.sync.backoff_initial_ms, "SYNC__BACKOFF_INITIAL_MS");
    set_parsed(&mut config.sync.backoff_max_ms, "SYNC__BACKOFF_MAX_MS");
    set_parsed(&mut config.sync.fetch_timeout_secs, "SYNC__FETCH_TIMEOUT_SECS");
    set_parsed(&mut config.sync.command_timeout_secs, "SYNC__COMMAND_TIMEOUT_SECS");

    // Bridge
    set_parsed(&mut config.bridge.max_chunk_chars, "BRIDGE__MAX_CHUNK_CHARS");
    set_parsed(&mut config.bridge.album_debounce_ms, "BRIDGE__ALBUM_DEBOUNCE_MS");

    // Classifier
    set_bool(&mut config.classifier.enabled, "CLASSIFIER__ENABLED");
    set_string(&mut config.classifier.api_base, "CLASSIFIER__API_BASE");
    set_string(&mut config.classifier.api_key, "CLASSIFIER__API_KEY");
    set_string(&mut config.classifier.model, "CLASSIFIER__MODEL");
    set_parsed(&mut config.classifier.timeout_secs, "CLASSIFIER__TIMEOUT_SECS");

    config
}

fn env(key: &str) -> Option<String> {
    std::env::var(format!("MAILGRAM_{key}")).ok()
}

fn set_string(target: &mut String, key: &str) {
    if let Some(val) = env(key) {
        *target = val;
    }
}

fn set_bool(target: &mut bool, key: &str) {
    if let Some(val) = env(key) {
        *target = val == "true" || val == "1";
    }
}

fn set_parsed<T: FromStr>(target: &mut T, key: &str) {
    if let Some(val) = env(key) {
        match val.parse::<T>() {
            Ok(v) => *target = v,
            Err(_) => warn!(var = %format!("MAILGRAM_{key}"), value = %val, "ignoring unparseable env override"),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
