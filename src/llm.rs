//! Minimal chat-completions client shared by LLM extraction and reply
//! synthesis.
//!
//! Unlike the embedding backend this client never retries: both callers
//! run under tight deadlines and fall back to local logic on any error.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::time::Duration;

use crate::config::ExtractionConfig;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// Per-call generation settings.
#[derive(Debug, Clone, Copy)]
pub struct ChatOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Ask the provider for a JSON object response.
    pub json: bool,
}

pub struct ChatClient {
    url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl ChatClient {
    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is not in the environment.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::new(&config.url, &config.model, api_key)
    }

    pub fn new(url: &str, model: &str, api_key: String) -> Result<Self> {
        // Callers enforce their own, tighter deadlines.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            url: url.to_string(),
            model: model.to_string(),
            api_key,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `messages` and return the first choice's content.
    pub async fn complete(&self, messages: &[ChatMessage], options: ChatOptions) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
        });
        if options.json {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Chat API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "  {\"reqs\": []}\n"}}]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "{\"reqs\": []}");
        assert!(parse_chat_response(&serde_json::json!({"choices": []})).is_err());
    }
}
