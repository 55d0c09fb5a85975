//! Chat completion transport.
//!
//! The `ChatBackend` trait is the seam between the generation logic and
//! the network: production uses `OpenRouterBackend` (OpenRouter-compatible
//! chat completions over reqwest), tests use scripted backends. Transport
//! errors surface to the caller, which owns the retry budget; the backend
//! itself never retries.

use super::models::{ModelTier, Usage};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Per-call timeout so one stuck request cannot stall the whole run.
const CALL_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Copy)]
pub struct CompletionOptions {
    pub model: ModelTier,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Response from the model including usage metadata when the provider
/// reports it.
#[derive(Debug)]
pub struct ChatCompletion {
    pub content: String,
    pub usage: Option<Usage>,
}

#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> anyhow::Result<ChatCompletion>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

pub struct OpenRouterBackend {
    client: reqwest::Client,
    api_key: String,
}

impl OpenRouterBackend {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CALL_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { client, api_key }
    }
}

#[async_trait::async_trait]
impl ChatBackend for OpenRouterBackend {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> anyhow::Result<ChatCompletion> {
        let request = ChatRequest {
            model: options.model.id(),
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stream: false,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .client
            .post(OPENROUTER_URL)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = match status.as_u16() {
                401 => "invalid API key".to_string(),
                429 => "rate limited by provider".to_string(),
                500..=599 => format!("provider server error ({status})"),
                _ => format!("API error {}: {}", status, truncate_str(&text, 200)),
            };
            anyhow::bail!("{}", message);
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("malformed completion response: {e}"))?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(ChatCompletion {
            content,
            usage: parsed.usage,
        })
    }
}

/// Truncate a string for display (Unicode-safe).
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    if s.chars().count() <= max_chars {
        s
    } else {
        let byte_idx = s
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        &s[..byte_idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_str_is_utf8_boundary_safe() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello", 3), "hel");
        assert_eq!(truncate_str("héllo", 2), "hé");
        assert_eq!(truncate_str("日本語テスト", 3), "日本語");
    }

    #[test]
    fn chat_response_parses_without_usage() {
        let raw = r#"{"choices": [{"message": {"content": "{}"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.usage.is_none());
        assert_eq!(parsed.choices[0].message.content, "{}");
    }
}
