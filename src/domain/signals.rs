//! Structured signals extracted from a call transcript.
//!
//! Every populated signal field must carry at least one verbatim evidence
//! quote from the transcript; `validate_evidence` enforces that after the
//! completion output is parsed. Validation failures are explicit values,
//! not panics, so the pipeline can fail the run and let the job retry.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when completion output fails schema or evidence validation
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("completion output is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("field '{field}' has a populated value but no evidence quote")]
    MissingEvidence { field: String },

    #[error("field '{field}' is out of range: {detail}")]
    OutOfRange { field: String, detail: String },

    #[error("completion returned an empty response")]
    EmptyResponse,
}

/// The value of a single signal field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl SignalValue {
    /// "unknown", empty list, and false are the unpopulated markers;
    /// anything else requires evidence.
    pub fn is_populated(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Number(_) => true,
            Self::Text(s) => s != "unknown" && !s.is_empty(),
            Self::List(items) => !items.is_empty(),
        }
    }
}

/// A signal field: a value plus the verbatim quotes backing it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalField {
    pub value: SignalValue,
    pub evidence: Vec<String>,
}

impl SignalField {
    fn check_evidence(&self, field: &str) -> Result<(), ValidationError> {
        if self.value.is_populated() && self.evidence.is_empty() {
            return Err(ValidationError::MissingEvidence {
                field: field.to_string(),
            });
        }
        Ok(())
    }
}

/// Counterpart disposition within one BANT dimension
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProspectSentiment {
    pub disposition: String,
    pub summary: String,
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSignals {
    pub discussed: SignalField,
    pub details: SignalField,
    pub budget_alignment: String,
    pub prospect_sentiment: ProspectSentiment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthoritySignals {
    pub decision_maker_identified: SignalField,
    pub decision_maker_name: SignalField,
    pub buying_process: SignalField,
    pub champion_identified: SignalField,
    pub prospect_sentiment: ProspectSentiment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeedSignals {
    pub pain_points: SignalField,
    pub current_solution: SignalField,
    pub urgency_level: SignalField,
    pub prospect_sentiment: ProspectSentiment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSignals {
    pub timeline: SignalField,
    pub upcoming_events: SignalField,
    pub demo_scheduled: SignalField,
    pub next_steps: SignalField,
    pub prospect_sentiment: ProspectSentiment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSignals {
    /// Evidence optional: often derived from meeting title metadata
    pub company_name: SignalField,
    pub employee_count: SignalField,
    pub identity_provider: SignalField,
    pub scim_mentioned: SignalField,
    pub competitors_mentioned: SignalField,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantTitle {
    pub name: String,
    pub title: String,
    pub role_in_deal: String,
}

/// The full structured output of the Extract step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedSignals {
    pub budget: BudgetSignals,
    pub authority: AuthoritySignals,
    pub need: NeedSignals,
    pub timing: TimingSignals,
    pub account: AccountSignals,
    pub participant_titles: Vec<ParticipantTitle>,
    pub call_summary: String,
}

impl ExtractedSignals {
    /// Enforce the evidence rule on every field that requires it.
    ///
    /// `account.company_name` is exempt: it is routinely sourced from the
    /// meeting title rather than the transcript.
    pub fn validate_evidence(&self) -> Result<(), ValidationError> {
        self.budget.discussed.check_evidence("budget.discussed")?;
        self.budget.details.check_evidence("budget.details")?;
        self.authority
            .decision_maker_identified
            .check_evidence("authority.decision_maker_identified")?;
        self.authority
            .decision_maker_name
            .check_evidence("authority.decision_maker_name")?;
        self.authority
            .buying_process
            .check_evidence("authority.buying_process")?;
        self.authority
            .champion_identified
            .check_evidence("authority.champion_identified")?;
        self.need.pain_points.check_evidence("need.pain_points")?;
        self.need
            .current_solution
            .check_evidence("need.current_solution")?;
        self.need.urgency_level.check_evidence("need.urgency_level")?;
        self.timing.timeline.check_evidence("timing.timeline")?;
        self.timing
            .upcoming_events
            .check_evidence("timing.upcoming_events")?;
        self.timing
            .demo_scheduled
            .check_evidence("timing.demo_scheduled")?;
        self.timing.next_steps.check_evidence("timing.next_steps")?;
        self.account
            .employee_count
            .check_evidence("account.employee_count")?;
        self.account
            .identity_provider
            .check_evidence("account.identity_provider")?;
        self.account
            .scim_mentioned
            .check_evidence("account.scim_mentioned")?;
        self.account
            .competitors_mentioned
            .check_evidence("account.competitors_mentioned")?;
        Ok(())
    }
}

/// Deal segment derived from company size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealSegment {
    Enterprise,
    MidTier,
}

impl Default for DealSegment {
    fn default() -> Self {
        Self::MidTier
    }
}

impl DealSegment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enterprise => "enterprise",
            Self::MidTier => "mid_tier",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(value: SignalValue, evidence: Vec<&str>) -> SignalField {
        SignalField {
            value,
            evidence: evidence.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn test_unknown_needs_no_evidence() {
        let f = field(SignalValue::Text("unknown".into()), vec![]);
        assert!(f.check_evidence("x").is_ok());
    }

    #[test]
    fn test_false_needs_no_evidence() {
        let f = field(SignalValue::Bool(false), vec![]);
        assert!(f.check_evidence("x").is_ok());
    }

    #[test]
    fn test_empty_list_needs_no_evidence() {
        let f = field(SignalValue::List(vec![]), vec![]);
        assert!(f.check_evidence("x").is_ok());
    }

    #[test]
    fn test_populated_without_evidence_fails() {
        let f = field(SignalValue::Text("around $50k".into()), vec![]);
        let err = f.check_evidence("budget.details").unwrap_err();
        assert!(matches!(err, ValidationError::MissingEvidence { ref field } if field == "budget.details"));
    }

    #[test]
    fn test_populated_with_evidence_passes() {
        let f = field(
            SignalValue::Text("around $50k".into()),
            vec!["we have about fifty thousand set aside"],
        );
        assert!(f.check_evidence("budget.details").is_ok());
    }
}
