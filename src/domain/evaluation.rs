//! Qualification judgment produced by the Evaluate step.

use serde::{Deserialize, Serialize};

use super::signals::ValidationError;

/// Score and rationale for one BANT dimension
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionScore {
    /// 1 through 5
    pub score: u8,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BantScores {
    pub budget: DimensionScore,
    pub authority: DimensionScore,
    pub need: DimensionScore,
    pub timing: DimensionScore,
}

/// Evaluator verdict on the deal as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverallStatus {
    Qualified,
    #[serde(rename = "Needs Work")]
    NeedsWork,
    Unqualified,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qualified => "Qualified",
            Self::NeedsWork => "Needs Work",
            Self::Unqualified => "Unqualified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Qualified" => Some(Self::Qualified),
            "Needs Work" => Some(Self::NeedsWork),
            "Unqualified" => Some(Self::Unqualified),
            _ => None,
        }
    }
}

/// The full structured output of the Evaluate step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub bant_scores: BantScores,

    /// Chance (0-100) this deal advances to the next stage
    pub stage_1_probability: u8,
    pub stage_1_reasoning: String,

    pub overall_status: OverallStatus,
    pub call_notes: String,
    pub coaching_notes: Vec<String>,
    pub next_steps: Vec<String>,

    /// Composite score 0-100
    pub score: u8,
}

impl Evaluation {
    /// Range checks the completion output schema cannot express.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, dim) in [
            ("budget", &self.bant_scores.budget),
            ("authority", &self.bant_scores.authority),
            ("need", &self.bant_scores.need),
            ("timing", &self.bant_scores.timing),
        ] {
            if dim.score < 1 || dim.score > 5 {
                return Err(ValidationError::OutOfRange {
                    field: format!("bant_scores.{name}.score"),
                    detail: format!("{} not in 1..=5", dim.score),
                });
            }
        }
        if self.stage_1_probability > 100 {
            return Err(ValidationError::OutOfRange {
                field: "stage_1_probability".into(),
                detail: format!("{} not in 0..=100", self.stage_1_probability),
            });
        }
        if self.score > 100 {
            return Err(ValidationError::OutOfRange {
                field: "score".into(),
                detail: format!("{} not in 0..=100", self.score),
            });
        }
        Ok(())
    }
}
