//! Chat rendering of a mail message.

use mailgram_classifier::{Classification, Verdict};
use mailgram_mail::ParsedEmail;

use crate::formatting::{escape_html, sanitize_html};
use crate::subject::NO_SUBJECT;

/// Both modes carry the whole body; splitting into sendable chunks is the
/// caller's job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderMode {
    /// Plain-text body, escaped.
    Text,
    /// HTML body kept where Telegram can show it, plain text otherwise.
    Rich,
}

/// Telegram HTML for `email`: header block, classifier notes, body, footer.
pub fn render_email(
    email: &ParsedEmail,
    classification: Option<&Classification>,
    mode: RenderMode,
) -> String {
    let mut out = String::new();

    out.push_str(&format!("📧 <b>{}</b>\n", escape_html(&email.sender_display())));
    let subject = email.subject.trim();
    let subject = if subject.is_empty() { NO_SUBJECT } else { subject };
    out.push_str(&format!("<b>Subject:</b> {}\n", escape_html(subject)));

    if let Some(c) = classification {
        match c.verdict {
            Verdict::Spam => {
                out.push_str("⚠️ <b>Possible spam or phishing.</b> Do not open links or attachments.\n")
            }
            Verdict::VerificationCode => match &c.code {
                Some(code) => out.push_str(&format!("🔑 Code: <code>{}</code>\n", escape_html(code))),
                None => out.push_str("🔑 Contains a verification code\n"),
            },
            Verdict::NotSpam => {}
        }
        if let Some(summary) = &c.summary {
            out.push_str(&format!("<i>{}</i>\n", escape_html(summary)));
        }
    }
    out.push('\n');

    let body = match mode {
        RenderMode::Text => escape_html(email.text.trim()),
        RenderMode::Rich => email
            .html
            .as_deref()
            .map(sanitize_html)
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| escape_html(email.text.trim())),
    };
    if body.trim().is_empty() {
        out.push_str("<i>(empty message)</i>");
    } else {
        out.push_str(&body);
    }

    let attachments = email.attachments.iter().filter(|a| !a.is_empty()).count();
    if attachments > 0 {
        out.push_str(&format!("\n\n📎 {attachments} attachment(s)"));
    }
    if let Some(link) = classification.and_then(|c| c.unsubscribe.as_deref()) {
        out.push_str(&format!("\n🔕 Unsubscribe: {}", escape_html(link)));
    }
    out
}
