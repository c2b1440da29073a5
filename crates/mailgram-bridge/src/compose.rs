//! Parsing of "compose a new mail" chat input.
//!
//! ```text
//! alice@example.com        ← recipient(s), comma separated
//! Lunch on Friday?         ← subject
//! Are you free at noon?    ← body (the rest)
//! ```

use thiserror::Error;

/// A well-formed compose request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposeRequest {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Malformed compose input. The message is shown to the user as is.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComposeError {
    #[error("Nothing to send.\n\n{}", USAGE)]
    Empty,

    #[error("The first line must be the recipient's email address.\n\n{}", USAGE)]
    MissingRecipient,

    #[error("The second line must be the subject.\n\n{}", USAGE)]
    MissingSubject,
}

/// How to write a new mail.
pub const USAGE: &str = "To write a new email send:\n\
recipient@example.com\n\
Subject\n\
Message text (optional files attached)";

/// Split compose input into recipient, subject and body.
pub fn parse_compose(text: &str) -> Result<ComposeRequest, ComposeError> {
    let mut lines = text.lines().skip_while(|l| l.trim().is_empty());

    let recipient_line = lines.next().ok_or(ComposeError::Empty)?;
    let to: Vec<String> = recipient_line
        .split([',', ';'])
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect();
    if to.is_empty() || to.iter().any(|r| !r.contains('@') || r.contains(char::is_whitespace)) {
        return Err(ComposeError::MissingRecipient);
    }

    let subject = lines.next().map(str::trim).unwrap_or_default();
    if subject.is_empty() {
        return Err(ComposeError::MissingSubject);
    }

    let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();

    Ok(ComposeRequest {
        to,
        subject: subject.to_string(),
        body,
    })
}
