//! SMTP sending via lettre.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MimeAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use mailgram_core::config::schema::SmtpConfig;
use tracing::info;

use crate::error::MailError;
use crate::transport::{MailSender, OutgoingMail};

/// Outbound delivery over SMTP/SMTPS.
pub struct SmtpSender {
    host: String,
    port: u16,
    use_tls: bool,
    use_ssl: bool,
    username: String,
    password: String,
    from: String,
    display_name: String,
}

impl SmtpSender {
    /// Build from config with resolved credentials and sender identity.
    pub fn new(
        config: &SmtpConfig,
        username: impl Into<String>,
        password: impl Into<String>,
        from: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            use_tls: config.use_tls,
            use_ssl: config.use_ssl,
            username: username.into(),
            password: password.into(),
            from: from.into(),
            display_name: display_name.into(),
        }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, MailError> {
        if self.host.is_empty() {
            return Err(MailError::Send("SMTP host not configured".into()));
        }
        let creds = Credentials::new(self.username.clone(), self.password.clone());

        let transport = if self.use_ssl {
            // Implicit TLS (SMTPS, port 465)
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.host)
                .map_err(|e| MailError::Send(format!("SMTP relay error: {e}")))?
                .port(self.port)
                .credentials(creds)
                .build()
        } else if self.use_tls {
            // STARTTLS (port 587)
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)
                .map_err(|e| MailError::Send(format!("SMTP STARTTLS error: {e}")))?
                .port(self.port)
                .credentials(creds)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.host)
                .port(self.port)
                .credentials(creds)
                .build()
        };
        Ok(transport)
    }

    fn from_mailbox(&self) -> Result<Mailbox, MailError> {
        let address = self
            .from
            .parse()
            .map_err(|e| MailError::Send(format!("invalid from address '{}': {e}", self.from)))?;
        let name = Some(self.display_name.clone()).filter(|n| !n.is_empty());
        Ok(Mailbox::new(name, address))
    }

    /// Assemble the MIME message.
    pub fn build_message(&self, mail: &OutgoingMail) -> Result<Message, MailError> {
        if mail.to.is_empty() {
            return Err(MailError::Send("no recipient".into()));
        }

        let mut builder = Message::builder()
            .from(self.from_mailbox()?)
            .subject(mail.subject.clone());
        for to in &mail.to {
            let mailbox: Mailbox = to
                .parse()
                .map_err(|e| MailError::Send(format!("invalid recipient '{to}': {e}")))?;
            builder = builder.to(mailbox);
        }
        if let Some(id) = &mail.in_reply_to {
            builder = builder.in_reply_to(id.clone());
        }
        if !mail.references.is_empty() {
            builder = builder.references(mail.references.join(" "));
        }

        let attachments: Vec<_> = mail.attachments.iter().filter(|a| !a.is_empty()).collect();
        let message = if attachments.is_empty() {
            builder
                .header(ContentType::TEXT_PLAIN)
                .body(mail.body.clone())
        } else {
            let mut multipart = MultiPart::mixed().singlepart(SinglePart::plain(mail.body.clone()));
            for a in attachments {
                let content_type = ContentType::parse(&a.mime_type)
                    .or_else(|_| ContentType::parse("application/octet-stream"))
                    .map_err(|e| MailError::Send(format!("bad content type: {e}")))?;
                multipart = multipart
                    .singlepart(MimeAttachment::new(a.filename.clone()).body(a.data.clone(), content_type));
            }
            builder.multipart(multipart)
        };

        message.map_err(|e| MailError::Send(format!("failed to build email: {e}")))
    }

    /// Check that the server accepts a connection (used by onboarding).
    pub async fn verify(&self) -> Result<(), MailError> {
        let ok = self
            .transport()?
            .test_connection()
            .await
            .map_err(|e| MailError::Send(format!("SMTP connection test failed: {e}")))?;
        if ok {
            Ok(())
        } else {
            Err(MailError::Send("SMTP server rejected the connection".into()))
        }
    }
}

#[async_trait]
impl MailSender for SmtpSender {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let message = self.build_message(mail)?;
        self.transport()?
            .send(message)
            .await
            .map_err(|e| MailError::Send(format!("SMTP send error: {e}")))?;

        info!(
            to = %mail.to.join(", "),
            subject = %mail.subject,
            attachments = mail.attachments.len(),
            "email sent"
        );
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mailgram_core::Attachment;

    fn sender() -> SmtpSender {
        SmtpSender::new(
            &SmtpConfig {
                host: "smtp.example.com".into(),
                ..Default::default()
            },
            "me@example.com",
            "secret",
            "me@example.com",
            "Me",
        )
    }

    fn formatted(mail: &OutgoingMail) -> String {
        let msg = sender().build_message(mail).unwrap();
        String::from_utf8_lossy(&msg.formatted()).to_string()
    }

    #[test]
    fn test_plain_message_headers() {
        let out = formatted(&OutgoingMail::new("a@b.com", "Hello", "Body text"));
        assert!(out.contains("From: Me <me@example.com>"));
        assert!(out.contains("To: a@b.com"));
        assert!(out.contains("Subject: Hello"));
        assert!(out.contains("Body text"));
        assert!(!out.contains("In-Reply-To"));
    }

    #[test]
    fn test_reply_threading_headers() {
        let mut mail = OutgoingMail::new("a@b.com", "Re: Hello", "ok");
        mail.in_reply_to = Some("<abc@b.com>".into());
        mail.references = vec!["<root@b.com>".into(), "<abc@b.com>".into()];
        let out = formatted(&mail);
        assert!(out.contains("In-Reply-To: <abc@b.com>"));
        assert!(out.contains("References: <root@b.com> <abc@b.com>"));
    }

    #[test]
    fn test_attachments_make_multipart() {
        let mail = OutgoingMail::new("a@b.com", "Files", "see attached").with_attachments(vec![
            Attachment::new("photo.jpg", "image/jpeg", vec![0xff, 0xd8, 0xff]),
            Attachment::new("empty.txt", "text/plain", Vec::new()),
        ]);
        let out = formatted(&mail);
        assert!(out.contains("multipart/mixed"));
        assert!(out.contains("photo.jpg"));
        assert!(!out.contains("empty.txt"));
    }

    #[test]
    fn test_invalid_recipient() {
        let err = sender()
            .build_message(&OutgoingMail::new("not-an-address", "x", "y"))
            .unwrap_err();
        assert!(matches!(err, MailError::Send(_)));
    }

    #[test]
    fn test_no_recipient() {
        let mail = OutgoingMail {
            subject: "x".into(),
            ..Default::default()
        };
        assert!(sender().build_message(&mail).is_err());
    }
}
