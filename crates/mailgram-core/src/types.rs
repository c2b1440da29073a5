//! Core types shared between the mail side and the chat side.

use serde::{Deserialize, Serialize};

/// Identifier of a conversation thread (forum topic) in the chat front end.
pub type ThreadId = i32;

/// A file travelling in either direction: a mail attachment pushed into chat,
/// or a chat upload attached to an outgoing mail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// File name shown to the recipient.
    pub filename: String,
    /// MIME type (e.g. `"application/pdf"`).
    pub mime_type: String,
    /// Raw content.
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the attachment carries no content.
    ///
    /// Empty attachments are never forwarded.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_creation() {
        let a = Attachment::new("report.pdf", "application/pdf", vec![1, 2, 3]);
        assert_eq!(a.filename, "report.pdf");
        assert_eq!(a.len(), 3);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_empty_attachment() {
        let a = Attachment::new("blank.txt", "text/plain", Vec::new());
        assert!(a.is_empty());
    }
}
