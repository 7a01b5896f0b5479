//! OpenAI-compatible chat-completion client.
//!
//! Requests JSON object output at temperature 0 and retries rate-limit
//! and server errors with exponential backoff.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::CompletionClient;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

pub struct CompletionApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl CompletionApi {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    async fn request_once(&self, system_prompt: &str, user_message: &str) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        self.client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": system_prompt},
                    {"role": "user", "content": user_message},
                ],
                "temperature": 0,
                "response_format": {"type": "json_object"},
            }))
            .send()
            .await
            .context("Failed to reach completion API")
    }
}

#[async_trait]
impl CompletionClient for CompletionApi {
    async fn complete_json(&self, system_prompt: &str, user_message: &str) -> Result<String> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let response = self.request_once(system_prompt, user_message).await?;
            let status = response.status();

            if (status.as_u16() == 429 || status.is_server_error()) && attempt < MAX_ATTEMPTS {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                tracing::warn!(
                    status = status.as_u16(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Completion API throttled, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("Completion API {}: {}", status, body.trim());
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .context("Failed to parse completion API response")?;

            let content = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .filter(|c| !c.is_empty())
                .context("Empty response from completion API")?;

            return Ok(content);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing() {
        let json = r#"{"choices": [{"message": {"content": "{\"ok\": true}"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("{\"ok\": true}")
        );
    }

    #[test]
    fn test_base_url_join() {
        let api = CompletionApi::new("https://api.example/v1/", "k", "gpt-4o");
        assert_eq!(api.base_url.trim_end_matches('/'), "https://api.example/v1");
    }
}
