use mailgram_mail::MailError;
use thiserror::Error;

/// Failure pushing one mail message into the chat.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Some sends went through, some did not.
    #[error("{failed} of {total} sends failed: {}", details.join("; "))]
    Partial {
        failed: usize,
        total: usize,
        details: Vec<String>,
    },

    /// Nothing reached the chat.
    #[error("chat front end unavailable: {0}")]
    Frontend(String),

    #[error("could not open a conversation thread: {0}")]
    Thread(String),
}

impl DispatchError {
    /// Fold per-send failures into one error; `None` if all succeeded.
    pub fn collect(total: usize, details: Vec<String>) -> Option<Self> {
        match details.len() {
            0 => None,
            n if n == total => Some(Self::Frontend(details.join("; "))),
            failed => Some(Self::Partial {
                failed,
                total,
                details,
            }),
        }
    }
}

/// Failure of a user-initiated action; the message is shown in the chat.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("could not load the original email ({0})")]
    Fetch(MailError),

    #[error("the mail server did not accept it ({0})")]
    Send(MailError),

    #[error("could not show the email ({0})")]
    Deliver(DispatchError),
}
