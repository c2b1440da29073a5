//! Classifier trait and its result types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Category assigned to a message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    #[default]
    NotSpam,
    /// Spam or phishing.
    Spam,
    /// The message carries a one-time / verification code.
    VerificationCode,
}

/// Result of classifying one message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Classification {
    pub verdict: Verdict,
    /// Short human summary.
    pub summary: Option<String>,
    /// The verification code itself, when `verdict` is `VerificationCode`.
    pub code: Option<String>,
    /// Unsubscribe link or address found in the message (display only).
    pub unsubscribe: Option<String>,
}

impl Classification {
    pub fn is_spam(&self) -> bool {
        self.verdict == Verdict::Spam
    }

    /// Drop blank optional fields.
    pub fn normalized(mut self) -> Self {
        for field in [&mut self.summary, &mut self.code, &mut self.unsubscribe] {
            if field.as_deref().is_some_and(|s| s.trim().is_empty()) {
                *field = None;
            }
        }
        self
    }
}

/// A content classifier.
///
/// Input is the concatenated subject/sender/recipient/body text of a message.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, input: &str) -> anyhow::Result<Classification>;

    /// Display name for logging.
    fn display_name(&self) -> &str;
}
