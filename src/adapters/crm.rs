//! CRM deal client.
//!
//! Lists every deal in a pipeline (each deal had a first qualifying
//! meeting regardless of its current stage) and enriches it with the
//! associated company name and contact emails. Requests are spaced by a
//! fixed delay to stay under the CRM rate limit, and 429 responses are
//! retried after the interval the server names.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::CrmClient;

/// ~9 requests/sec keeps us under the 100-per-10s limit
const RATE_LIMIT_DELAY: Duration = Duration::from_millis(110);

const PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct CrmDeal {
    pub deal_id: String,
    pub deal_name: String,
    pub company_name: Option<String>,
    pub contact_emails: Vec<String>,
}

pub struct CrmApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    total: u64,
    results: Vec<SearchResult>,
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: String,
    #[serde(default)]
    properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<PagingNext>,
}

#[derive(Debug, Deserialize)]
struct PagingNext {
    after: String,
}

#[derive(Debug, Deserialize)]
struct AssociationResponse {
    results: Vec<AssociationResult>,
}

#[derive(Debug, Deserialize)]
struct AssociationResult {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ObjectResponse {
    #[serde(default)]
    properties: serde_json::Map<String, serde_json::Value>,
}

impl CrmApi {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.client.get(self.url(path))).await
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        self.send(self.client.post(self.url(path)).json(body)).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn send<T: serde::de::DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        loop {
            tokio::time::sleep(RATE_LIMIT_DELAY).await;

            let response = request
                .try_clone()
                .context("CRM request not cloneable")?
                .bearer_auth(&self.api_key)
                .send()
                .await
                .context("Failed to reach CRM API")?;

            if response.status().as_u16() == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(10);
                tracing::warn!(retry_after, "CRM rate limited, backing off");
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("CRM API {}: {}", status, body.trim());
            }

            return response.json().await.context("Failed to parse CRM response");
        }
    }

    /// Company name of the first associated company, if any. Association
    /// failures are tolerated: a deal without a resolvable company still
    /// matches by contact email.
    async fn company_name(&self, deal_id: &str) -> Option<String> {
        let assoc: AssociationResponse = self
            .get_json(&format!("/crm/v3/objects/deals/{deal_id}/associations/companies"))
            .await
            .ok()?;
        let company_id = &assoc.results.first()?.id;

        let company: ObjectResponse = self
            .get_json(&format!("/crm/v3/objects/companies/{company_id}?properties=name"))
            .await
            .ok()?;
        company
            .properties
            .get("name")
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    async fn contact_emails(&self, deal_id: &str) -> Vec<String> {
        let assoc: AssociationResponse = match self
            .get_json(&format!("/crm/v3/objects/deals/{deal_id}/associations/contacts"))
            .await
        {
            Ok(a) => a,
            Err(_) => return Vec::new(),
        };

        let mut emails = Vec::new();
        for contact in &assoc.results {
            let detail: ObjectResponse = match self
                .get_json(&format!("/crm/v3/objects/contacts/{}?properties=email", contact.id))
                .await
            {
                Ok(d) => d,
                Err(_) => continue,
            };
            if let Some(email) = detail.properties.get("email").and_then(|v| v.as_str()) {
                emails.push(email.to_lowercase());
            }
        }
        emails
    }
}

#[async_trait]
impl CrmClient for CrmApi {
    async fn fetch_pipeline_deals(
        &self,
        pipeline_id: &str,
        _stage_id: &str,
    ) -> Result<Vec<CrmDeal>> {
        let mut deals = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut body = serde_json::json!({
                "filterGroups": [
                    {"filters": [{"propertyName": "pipeline", "operator": "EQ", "value": pipeline_id}]}
                ],
                "properties": ["dealname"],
                "limit": PAGE_SIZE,
            });
            if let Some(cursor) = &after {
                body["after"] = serde_json::json!(cursor);
            }

            let page: SearchResponse = self
                .post_json("/crm/v3/objects/deals/search", &body)
                .await?;

            tracing::debug!(
                page_size = page.results.len(),
                total = page.total,
                "Fetched CRM deal page"
            );

            for result in &page.results {
                let deal_name = result
                    .properties
                    .get("dealname")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let company_name = self.company_name(&result.id).await;
                let contact_emails = self.contact_emails(&result.id).await;

                deals.push(CrmDeal {
                    deal_id: result.id.clone(),
                    deal_name,
                    company_name,
                    contact_emails,
                });
            }

            after = page.paging.and_then(|p| p.next).map(|n| n.after);
            if after.is_none() {
                break;
            }
        }

        Ok(deals)
    }
}
