//! Utility helpers — path resolution, timestamps, string manipulation.

use std::path::PathBuf;

/// Get the Mailgram data directory (e.g. `~/.mailgram/`).
pub fn get_data_path() -> PathBuf {
    let home = home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".mailgram")
}

/// Cursor file (e.g. `~/.mailgram/last_uid`).
pub fn get_cursor_path() -> PathBuf {
    get_data_path().join("last_uid")
}

/// Encrypted conversation map (e.g. `~/.mailgram/conversations.bin`).
pub fn get_conversations_path() -> PathBuf {
    get_data_path().join("conversations.bin")
}

/// Encrypted credentials fallback file (e.g. `~/.mailgram/credentials.bin`).
pub fn get_credentials_path() -> PathBuf {
    get_data_path().join("credentials.bin")
}

/// Truncate a string to `max_len` characters, adding "..." if truncated.
/// Unicode-safe.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

/// Sanitize a string for use as a filename.
pub fn safe_filename(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "attachment".to_string()
    } else {
        cleaned
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("USERPROFILE").ok().map(PathBuf::from))
}
