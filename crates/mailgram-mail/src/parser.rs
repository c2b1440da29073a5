//! RFC 5322 parsing via `mailparse`.

use mailgram_core::Attachment;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use regex::Regex;
use std::sync::OnceLock;

use crate::error::MailError;

/// Structured view of one fetched message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedEmail {
    /// Sender address (lowercase).
    pub sender: String,
    /// Sender display name, if any.
    pub sender_name: String,
    /// Reply-To address, if different from the sender.
    pub reply_to: Option<String>,
    /// Raw `To` header.
    pub to: String,
    pub subject: String,
    /// Date header value.
    pub date: String,
    /// Message-ID header (with angle brackets).
    pub message_id: String,
    /// Message-IDs from the `References` header, oldest first.
    pub references: Vec<String>,
    /// Plain-text body (HTML converted when no text part exists).
    pub text: String,
    /// HTML body, if the message has one.
    pub html: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl ParsedEmail {
    /// "Name <addr>" or just the address.
    pub fn sender_display(&self) -> String {
        if self.sender_name.is_empty() {
            self.sender.clone()
        } else {
            format!("{} <{}>", self.sender_name, self.sender)
        }
    }

    /// Subject, sender, recipient and body as one block (classifier input).
    pub fn summary_text(&self) -> String {
        format!(
            "Subject: {}\nFrom: {}\nTo: {}\n\n{}",
            self.subject,
            self.sender_display(),
            self.to,
            self.text
        )
    }
}

/// Parse a raw message.
pub fn parse_email(raw: &[u8]) -> Result<ParsedEmail, MailError> {
    let parsed = mailparse::parse_mail(raw).map_err(|e| MailError::Parse(e.to_string()))?;

    let header = |name: &str| -> String {
        parsed
            .headers
            .get_first_value(name)
            .unwrap_or_default()
            .trim()
            .to_string()
    };

    let from_raw = header("From");
    if from_raw.is_empty() && header("Subject").is_empty() && parsed.headers.is_empty() {
        return Err(MailError::Parse("message has no headers".into()));
    }

    let sender = extract_address(&from_raw);
    let reply_to = Some(extract_address(&header("Reply-To")))
        .filter(|r| !r.is_empty() && *r != sender);

    let mut plain = Vec::new();
    let mut html = Vec::new();
    let mut attachments = Vec::new();
    collect_parts(&parsed, &mut plain, &mut html, &mut attachments);

    let html_body = if html.is_empty() {
        None
    } else {
        Some(html.join("\n"))
    };
    let text = if !plain.is_empty() {
        plain.join("\n")
    } else if let Some(h) = &html_body {
        html_to_text(h)
    } else {
        String::new()
    };

    Ok(ParsedEmail {
        sender,
        sender_name: extract_display_name(&from_raw),
        reply_to,
        to: header("To"),
        subject: header("Subject"),
        date: header("Date"),
        message_id: header("Message-ID"),
        references: header("References")
            .split_whitespace()
            .filter(|s| s.starts_with('<'))
            .map(str::to_string)
            .collect(),
        text: text.trim().to_string(),
        html: html_body,
        attachments,
    })
}

/// Walk the MIME tree collecting text parts and attachments.
fn collect_parts(
    mail: &ParsedMail,
    plain: &mut Vec<String>,
    html: &mut Vec<String>,
    attachments: &mut Vec<Attachment>,
) {
    if !mail.subparts.is_empty() {
        for part in &mail.subparts {
            collect_parts(part, plain, html, attachments);
        }
        return;
    }

    let ct = mail.ctype.mimetype.to_lowercase();
    let disposition = mail.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .or_else(|| mail.ctype.params.get("name"))
        .cloned();

    let is_text = ct == "text/plain" || ct == "text/html";
    if disposition.disposition == DispositionType::Attachment || (!is_text && filename.is_some())
    {
        if let Ok(data) = mail.get_body_raw() {
            attachments.push(Attachment::new(
                filename.unwrap_or_else(|| "attachment".to_string()),
                ct,
                data,
            ));
        }
        return;
    }

    if let Ok(body) = mail.get_body() {
        match ct.as_str() {
            "text/plain" => plain.push(body),
            "text/html" => html.push(body),
            _ => {}
        }
    }
}

/// Extract the email address from a From header value.
///
/// Handles formats like:
/// - `user@example.com`
/// - `"User Name" <user@example.com>`
/// - `User Name <user@example.com>`
pub fn extract_address(header: &str) -> String {
    if let (Some(start), Some(end)) = (header.rfind('<'), header.rfind('>')) {
        if end > start {
            return header[start + 1..end].trim().to_lowercase();
        }
    }
    header.trim().to_lowercase()
}

/// Display name part of an address header, unquoted.
pub fn extract_display_name(header: &str) -> String {
    match header.rfind('<') {
        Some(pos) => header[..pos].trim().trim_matches('"').trim().to_string(),
        None => String::new(),
    }
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap_or_else(|e| panic!("invalid regex {pattern}: {e}")))
}

/// Convert minimal HTML to plain text.
pub fn html_to_text(html: &str) -> String {
    static BR: OnceLock<Regex> = OnceLock::new();
    static BLOCK_END: OnceLock<Regex> = OnceLock::new();
    static DROP: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    static BLANKS: OnceLock<Regex> = OnceLock::new();

    let text = regex(&DROP, r"(?is)<(script|style|head)[^>]*>.*?</(script|style|head)>")
        .replace_all(html, "");
    let text = regex(&BR, r"(?i)<br\s*/?>").replace_all(&text, "\n");
    let text = regex(&BLOCK_END, r"(?i)</(p|div|tr|li|h[1-6])>").replace_all(&text, "\n");
    let text = regex(&TAG, r"<[^>]+>").replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    regex(&BLANKS, r"\n{3,}")
        .replace_all(text.trim(), "\n\n")
        .to_string()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_address_plain() {
        assert_eq!(extract_address("user@example.com"), "user@example.com");
    }

    #[test]
    fn test_extract_address_with_name() {
        assert_eq!(
            extract_address("\"John Doe\" <John@Example.com>"),
            "john@example.com"
        );
        assert_eq!(extract_display_name("\"John Doe\" <john@example.com>"), "John Doe");
        assert_eq!(extract_display_name("john@example.com"), "");
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(html_to_text("Hello<br>World"), "Hello\nWorld");
        assert_eq!(html_to_text("<p>Hello</p><p>World</p>"), "Hello\nWorld");
        assert_eq!(html_to_text("&amp; &lt; &gt; &quot; &#39;"), "& < > \" '");
        assert_eq!(
            html_to_text("<style>p{color:red}</style><b>bold</b>"),
            "bold"
        );
    }

    #[test]
    fn test_parse_simple_email() {
        let raw = b"From: \"Alice\" <alice@example.com>\r\n\
            To: me@example.com\r\n\
            Subject: Test Email\r\n\
            Date: Mon, 1 Jan 2024 00:00:00 +0000\r\n\
            Message-ID: <abc123@example.com>\r\n\
            References: <r1@example.com> <r2@example.com>\r\n\
            Content-Type: text/plain; charset=utf-8\r\n\
            \r\n\
            Hello, this is a test email.\r\n";

        let parsed = parse_email(raw).unwrap();
        assert_eq!(parsed.sender, "alice@example.com");
        assert_eq!(parsed.sender_name, "Alice");
        assert_eq!(parsed.sender_display(), "Alice <alice@example.com>");
        assert_eq!(parsed.subject, "Test Email");
        assert_eq!(parsed.message_id, "<abc123@example.com>");
        assert_eq!(parsed.references, vec!["<r1@example.com>", "<r2@example.com>"]);
        assert_eq!(parsed.text, "Hello, this is a test email.");
        assert!(parsed.html.is_none());
        assert!(parsed.reply_to.is_none());
    }

    #[test]
    fn test_parse_html_only_email() {
        let raw = b"From: sender@example.com\r\n\
            Subject: HTML Test\r\n\
            Content-Type: text/html; charset=utf-8\r\n\
            \r\n\
            <p>Hello</p><p>World</p>\r\n";

        let parsed = parse_email(raw).unwrap();
        assert_eq!(parsed.text, "Hello\nWorld");
        assert!(parsed.html.as_deref().unwrap().contains("<p>Hello</p>"));
    }

    #[test]
    fn test_parse_reply_to() {
        let raw = b"From: a@example.com\r\n\
            Reply-To: List <list@example.com>\r\n\
            Subject: x\r\n\
            \r\n\
            body\r\n";
        let parsed = parse_email(raw).unwrap();
        assert_eq!(parsed.reply_to.as_deref(), Some("list@example.com"));
    }

    #[test]
    fn test_parse_multipart_with_attachment() {
        let raw = b"From: a@example.com\r\n\
            Subject: Invoice\r\n\
            MIME-Version: 1.0\r\n\
            Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
            \r\n\
            --XYZ\r\n\
            Content-Type: multipart/alternative; boundary=\"ALT\"\r\n\
            \r\n\
            --ALT\r\n\
            Content-Type: text/plain; charset=utf-8\r\n\
            \r\n\
            Please find attached.\r\n\
            --ALT\r\n\
            Content-Type: text/html; charset=utf-8\r\n\
            \r\n\
            <p>Please find <b>attached</b>.</p>\r\n\
            --ALT--\r\n\
            --XYZ\r\n\
            Content-Type: application/pdf; name=\"invoice.pdf\"\r\n\
            Content-Disposition: attachment; filename=\"invoice.pdf\"\r\n\
            Content-Transfer-Encoding: base64\r\n\
            \r\n\
            JVBERi0xLjQK\r\n\
            --XYZ--\r\n";

        let parsed = parse_email(raw).unwrap();
        assert_eq!(parsed.text, "Please find attached.");
        assert!(parsed.html.is_some());
        assert_eq!(parsed.attachments.len(), 1);
        assert_eq!(parsed.attachments[0].filename, "invoice.pdf");
        assert_eq!(parsed.attachments[0].mime_type, "application/pdf");
        assert_eq!(parsed.attachments[0].data, b"%PDF-1.4\n");
    }

    #[test]
    fn test_summary_text() {
        let email = ParsedEmail {
            sender: "a@b.com".into(),
            to: "me@x.com".into(),
            subject: "Code".into(),
            text: "Your code is 123456".into(),
            ..Default::default()
        };
        let s = email.summary_text();
        assert!(s.starts_with("Subject: Code\nFrom: a@b.com\nTo: me@x.com"));
        assert!(s.ends_with("Your code is 123456"));
    }
}
