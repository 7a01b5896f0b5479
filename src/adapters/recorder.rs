//! Meeting-recording provider API client.
//!
//! The provider exposes a cursor-paginated meeting listing; both lookup
//! paths (by recording id, by URL) walk pages until a match or the page
//! cap is hit.

use anyhow::{Context, Result};
use serde::Deserialize;

/// Hard cap on pages walked during URL search
const MAX_PAGES: u32 = 30;

pub struct RecorderClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct MeetingPage {
    #[serde(default)]
    items: Vec<serde_json::Value>,
    #[serde(default)]
    next_cursor: Option<String>,
}

impl RecorderClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn fetch_page(&self, cursor: Option<&str>) -> Result<MeetingPage> {
        let mut url = format!(
            "{}/meetings?include_transcript=true",
            self.base_url.trim_end_matches('/')
        );
        if let Some(cursor) = cursor {
            url.push_str(&format!("&cursor={cursor}"));
        }

        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .context("Failed to reach recorder API")?;

        if !response.status().is_success() {
            anyhow::bail!("Recorder API error: {}", response.status());
        }

        response
            .json()
            .await
            .context("Failed to parse recorder API response")
    }

    /// Walk the listing until a meeting with the given recording id turns
    /// up; None when the listing is exhausted.
    pub async fn find_by_recording_id(
        &self,
        recording_id: u64,
    ) -> Result<Option<serde_json::Value>> {
        let target = recording_id.to_string();
        let matches = move |item: &serde_json::Value| {
            item.get("recording_id")
                .map(|v| match v {
                    serde_json::Value::Number(n) => n.to_string() == target,
                    serde_json::Value::String(s) => *s == target,
                    _ => false,
                })
                .unwrap_or(false)
        };
        self.search(matches).await
    }

    /// Match a meeting by its url or share_url (trailing slash ignored).
    pub async fn find_by_url(&self, meeting_url: &str) -> Result<Option<serde_json::Value>> {
        let trimmed = meeting_url.trim().trim_end_matches('/').to_string();
        let matches = move |item: &serde_json::Value| {
            ["url", "share_url"].iter().any(|key| {
                item.get(*key)
                    .and_then(|v| v.as_str())
                    .map(|u| u.trim_end_matches('/') == trimmed)
                    .unwrap_or(false)
            })
        };
        self.search(matches).await
    }

    async fn search<F>(&self, matches: F) -> Result<Option<serde_json::Value>>
    where
        F: Fn(&serde_json::Value) -> bool,
    {
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page = self.fetch_page(cursor.as_deref()).await?;

            if let Some(found) = page.items.iter().find(|item| matches(item)) {
                return Ok(Some(found.clone()));
            }

            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }

        Ok(None)
    }
}
