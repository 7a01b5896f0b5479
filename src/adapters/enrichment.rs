//! Company-size enrichment.
//!
//! Looks up an organization by guessed domain and maps employee count
//! to a deal segment. Every failure path degrades to the default
//! profile; enrichment must never fail a processing run.

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::DealSegment;
use crate::ingest::title::guess_company_domain;

use super::EnrichmentClient;

/// Employee count at or above which a deal is enterprise
const ENTERPRISE_THRESHOLD: u32 = 2000;

#[derive(Debug, Clone)]
pub struct CompanyProfile {
    pub employee_count: Option<u32>,
    pub segment: DealSegment,
}

impl Default for CompanyProfile {
    fn default() -> Self {
        Self {
            employee_count: None,
            segment: DealSegment::MidTier,
        }
    }
}

impl CompanyProfile {
    pub fn from_employee_count(count: Option<u32>) -> Self {
        let segment = match count {
            Some(n) if n >= ENTERPRISE_THRESHOLD => DealSegment::Enterprise,
            _ => DealSegment::MidTier,
        };
        Self {
            employee_count: count,
            segment,
        }
    }
}

pub struct EnrichmentApi {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnrichResponse {
    organization: Option<Organization>,
}

#[derive(Debug, Deserialize)]
struct Organization {
    estimated_num_employees: Option<u32>,
}

impl EnrichmentApi {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl EnrichmentClient for EnrichmentApi {
    async fn lookup_company(&self, company_name: &str) -> CompanyProfile {
        let api_key = match &self.api_key {
            Some(k) => k,
            None => {
                tracing::warn!("Enrichment API key not set, defaulting to mid_tier");
                return CompanyProfile::default();
            }
        };

        let domain = guess_company_domain(company_name);
        let url = format!(
            "{}/api/v1/organizations/enrich?domain={}",
            self.base_url.trim_end_matches('/'),
            domain
        );

        let response = match self
            .client
            .get(&url)
            .header("x-api-key", api_key)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(%domain, error = %e, "Enrichment request failed, defaulting to mid_tier");
                return CompanyProfile::default();
            }
        };

        if !response.status().is_success() {
            tracing::warn!(
                %domain,
                status = response.status().as_u16(),
                "Enrichment API error, defaulting to mid_tier"
            );
            return CompanyProfile::default();
        }

        match response.json::<EnrichResponse>().await {
            Ok(body) => CompanyProfile::from_employee_count(
                body.organization.and_then(|o| o.estimated_num_employees),
            ),
            Err(e) => {
                tracing::warn!(%domain, error = %e, "Unparseable enrichment response");
                CompanyProfile::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_threshold() {
        assert_eq!(
            CompanyProfile::from_employee_count(Some(2000)).segment,
            DealSegment::Enterprise
        );
        assert_eq!(
            CompanyProfile::from_employee_count(Some(1999)).segment,
            DealSegment::MidTier
        );
        assert_eq!(
            CompanyProfile::from_employee_count(None).segment,
            DealSegment::MidTier
        );
    }
}
