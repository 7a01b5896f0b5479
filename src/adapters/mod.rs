//! Adapter interfaces for external collaborators.
//!
//! Adapters provide a unified interface for the services the pipeline
//! leans on: the text-completion API, the meeting recorder, the CRM,
//! company enrichment, and callback receivers. Traits sit at the seams
//! so the orchestrator and tests can swap implementations.

pub mod callback;
pub mod completion;
pub mod crm;
pub mod enrichment;
pub mod recorder;

use anyhow::Result;
use async_trait::async_trait;

pub use callback::{format_growth_digest, format_owner_digest, CallbackPoster, Digest};
pub use completion::CompletionApi;
pub use crm::{CrmApi, CrmDeal};
pub use enrichment::{CompanyProfile, EnrichmentApi};
pub use recorder::RecorderClient;

/// JSON-mode text completion
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Run one system+user exchange and return the raw completion text.
    /// Implementations request JSON output and retry transient failures.
    async fn complete_json(&self, system_prompt: &str, user_message: &str) -> Result<String>;
}

/// Company-size enrichment. Infallible by contract: lookup problems
/// degrade to the default profile rather than failing the caller.
#[async_trait]
pub trait EnrichmentClient: Send + Sync {
    async fn lookup_company(&self, company_name: &str) -> CompanyProfile;
}

/// CRM deal listing for phrase-extraction candidate selection
#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Deals in the given pipeline, with associated company name and
    /// contact emails.
    async fn fetch_pipeline_deals(
        &self,
        pipeline_id: &str,
        stage_id: &str,
    ) -> Result<Vec<CrmDeal>>;
}
