//! HTTP classifier for OpenAI-compatible chat-completions APIs.
//!
//! Sends the message text with a fixed system prompt asking for a JSON
//! verdict and parses the reply into a [`Classification`].

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use mailgram_core::config::schema::ClassifierConfig;
use mailgram_core::utils::truncate_string;

use crate::traits::{Classification, Classifier};

/// Input beyond this many characters is cut before sending.
const MAX_INPUT_CHARS: usize = 8000;

const SYSTEM_PROMPT: &str = "You classify emails. Reply with a single JSON object: \
{\"verdict\": \"not_spam\" | \"spam\" | \"verification_code\", \
\"summary\": one short sentence, \
\"code\": the verification code if verdict is verification_code, else null, \
\"unsubscribe\": an unsubscribe URL or address found in the email, else null}. \
Use \"spam\" for spam and phishing.";

// ─────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f64,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

// ─────────────────────────────────────────────
// HttpClassifier
// ─────────────────────────────────────────────

pub struct HttpClassifier {
    /// HTTP client (shared, connection-pooled).
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for HttpClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClassifier")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}

impl HttpClassifier {
    /// Build from config; `api_key` is the resolved secret.
    pub fn new(config: &ClassifierConfig, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            api_key: api_key.into(),
            model: config.model.clone(),
        })
    }

    /// Build the full chat completions URL.
    fn completions_url(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        format!("{}/chat/completions", base)
    }
}

/// Parse the model's reply, tolerating a Markdown code fence around the JSON.
fn parse_reply(content: &str) -> anyhow::Result<Classification> {
    let trimmed = content.trim();
    let json = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => bail!("classifier reply is not JSON: {}", truncate_string(trimmed, 80)),
    };
    let parsed: Classification =
        serde_json::from_str(json).context("classifier reply has unexpected shape")?;
    Ok(parsed.normalized())
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, input: &str) -> anyhow::Result<Classification> {
        let input = truncate_string(input, MAX_INPUT_CHARS);
        debug!(model = %self.model, chars = input.len(), "classifying message");

        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &input,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "classifier request failed");
                anyhow!("error calling classifier: {e}")
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            error!(status = %status, body = %error_text, "classifier API error");
            bail!("classifier API error: {status}");
        }

        let reply: ChatResponse = response
            .json()
            .await
            .context("failed to parse classifier response")?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("classifier returned no content"))?;

        let classification = parse_reply(&content)?;
        debug!(verdict = ?classification.verdict, "classification received");
        Ok(classification)
    }

    fn display_name(&self) -> &str {
        &self.model
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Verdict;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_config(api_base: &str) -> ClassifierConfig {
        ClassifierConfig {
            enabled: true,
            api_base: api_base.to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 5,
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-test",
            "choices": [{
                "message": { "content": content },
                "finish_reason": "stop"
            }]
        })
    }

    #[test]
    fn test_completions_url_trailing_slash() {
        let c = HttpClassifier::new(&make_config("https://api.openai.com/v1/"), "k").unwrap();
        assert_eq!(
            c.completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_parse_reply_with_code_fence() {
        let c = parse_reply("```json\n{\"verdict\":\"spam\",\"summary\":\"Fake bank\"}\n```")
            .unwrap();
        assert_eq!(c.verdict, Verdict::Spam);
        assert_eq!(c.summary.as_deref(), Some("Fake bank"));
    }

    #[test]
    fn test_parse_reply_not_json() {
        assert!(parse_reply("I think this is spam").is_err());
    }

    #[tokio::test]
    async fn test_classify_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key-123"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "response_format": { "type": "json_object" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                r#"{"verdict":"verification_code","summary":"Login code","code":"482913","unsubscribe":null}"#,
            )))
            .mount(&mock_server)
            .await;

        let classifier =
            HttpClassifier::new(&make_config(&mock_server.uri()), "test-key-123").unwrap();
        let c = classifier
            .classify("Subject: Your code\nFrom: a@b.com\n\nCode: 482913")
            .await
            .unwrap();

        assert_eq!(c.verdict, Verdict::VerificationCode);
        assert_eq!(c.code.as_deref(), Some("482913"));
        assert!(c.unsubscribe.is_none());
    }

    #[tokio::test]
    async fn test_classify_api_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "Rate limit exceeded" }
            })))
            .mount(&mock_server)
            .await;

        let classifier = HttpClassifier::new(&make_config(&mock_server.uri()), "k").unwrap();
        let err = classifier.classify("x").await.unwrap_err();
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn test_classify_empty_choices() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })),
            )
            .mount(&mock_server)
            .await;

        let classifier = HttpClassifier::new(&make_config(&mock_server.uri()), "k").unwrap();
        assert!(classifier.classify("x").await.is_err());
    }

    #[tokio::test]
    async fn test_classify_network_error() {
        // Point to a port that's not listening
        let classifier = HttpClassifier::new(&make_config("http://127.0.0.1:1"), "k").unwrap();
        let err = classifier.classify("x").await.unwrap_err();
        assert!(err.to_string().contains("error calling classifier"));
    }
}
