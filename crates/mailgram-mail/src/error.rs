//! Mail-side error taxonomy.

use mailgram_core::StoreError;
use thiserror::Error;

/// Failure talking to the mail servers or handling their data.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{command} failed: {response}")]
    Protocol { command: String, response: String },

    #[error("{op} timed out after {secs}s")]
    Timeout { op: &'static str, secs: u64 },

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("not connected")]
    NotConnected,

    #[error("message {0} not found")]
    MissingMessage(u32),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MailError {
    /// Whether the session should be considered dead.
    ///
    /// Protocol-level refusals (`NO`/`BAD`), missing messages and parse
    /// failures leave the session usable.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Connect(_)
                | Self::Auth(_)
                | Self::Timeout { .. }
                | Self::Closed(_)
                | Self::NotConnected
                | Self::RetriesExhausted { .. }
        )
    }

    pub(crate) fn protocol(command: impl Into<String>, response: impl Into<String>) -> Self {
        Self::Protocol {
            command: command.into(),
            response: response.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_classification() {
        assert!(MailError::Closed("BYE".into()).is_connection_error());
        assert!(MailError::Timeout { op: "fetch", secs: 10 }.is_connection_error());
        assert!(MailError::NotConnected.is_connection_error());
        assert!(!MailError::protocol("SELECT", "A0002 NO no such mailbox").is_connection_error());
        assert!(!MailError::MissingMessage(4).is_connection_error());
        assert!(!MailError::Parse("bad".into()).is_connection_error());
    }

    #[test]
    fn test_display() {
        let e = MailError::protocol("UID SEARCH", "A0003 BAD syntax");
        assert_eq!(e.to_string(), "UID SEARCH failed: A0003 BAD syntax");
    }
}
