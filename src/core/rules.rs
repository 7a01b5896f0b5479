//! Deterministic cross-check between extracted signals and the stated
//! evaluation verdict.
//!
//! The evaluator occasionally returns a generous overall status on top
//! of uniformly weak dimension scores. The rule overrides the status
//! and records why; it never fails a run. Enterprise deals rarely
//! surface budget on a first call, so the budget dimension is excluded
//! from the check for that segment.

use crate::domain::{DealSegment, Evaluation, ExtractedSignals, OverallStatus};

pub const RUBRIC_VERSION: &str = "bant_v1";

/// Score at or below which a dimension counts as weak
const LOW_SCORE: u8 = 2;

#[derive(Debug, Clone)]
pub struct CrossCheckOutcome {
    pub status: OverallStatus,
    pub mismatch: Option<String>,
}

pub fn cross_check(
    _signals: &ExtractedSignals,
    evaluation: &Evaluation,
    segment: DealSegment,
) -> CrossCheckOutcome {
    let b = &evaluation.bant_scores;

    let budget_low = b.budget.score <= LOW_SCORE;
    let others_low =
        b.authority.score <= LOW_SCORE && b.need.score <= LOW_SCORE && b.timing.score <= LOW_SCORE;

    let all_low = match segment {
        DealSegment::Enterprise => others_low,
        DealSegment::MidTier => budget_low && others_low,
    };

    if all_low && evaluation.overall_status != OverallStatus::Unqualified {
        let scope = match segment {
            DealSegment::Enterprise => "All non-budget BANT dimensions",
            DealSegment::MidTier => "All BANT dimensions",
        };
        return CrossCheckOutcome {
            status: OverallStatus::Unqualified,
            mismatch: Some(format!(
                "{scope} scored <= {LOW_SCORE} but evaluator returned \"{}\"",
                evaluation.overall_status.as_str()
            )),
        };
    }

    CrossCheckOutcome {
        status: evaluation.overall_status,
        mismatch: None,
    }
}
