//! Completion callbacks and the digests they carry.
//!
//! When a processing job carries a callback URL, one POST is issued on
//! success with a growth-team digest, an account-owner digest, and the
//! raw evaluation/signal data. Delivery is best-effort: a failure is
//! logged and never retried, and never fails the job.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Evaluation, ExtractedSignals};
use crate::ingest::MeetingContext;

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// A preformatted summary for one audience
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
    pub ae_name: Option<String>,
    pub account_name: Option<String>,
    pub meeting_title: String,
    pub overall_status: String,
    pub stage_1_probability: u8,
    pub text: String,
}

/// "●●●○○" for a 1-5 score
fn score_pips(score: u8) -> String {
    let filled = score.min(5) as usize;
    format!("{}{}", "●".repeat(filled), "○".repeat(5 - filled))
}

fn sentiment_label(disposition: &str) -> String {
    let mut chars = disposition.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Digest for the growth team: full BANT breakdown with counterpart
/// sentiment per dimension.
pub fn format_growth_digest(
    evaluation: &Evaluation,
    signals: &ExtractedSignals,
    context: &MeetingContext,
) -> Digest {
    let ae = context.account_owner.as_deref().unwrap_or("Unknown AE");
    let account = context
        .prospect_company
        .as_deref()
        .unwrap_or("Unknown Account");
    let b = &evaluation.bant_scores;

    let participant_lines = signals
        .participant_titles
        .iter()
        .map(|p| format!("• {} — {}", p.name, p.title))
        .collect::<Vec<_>>()
        .join("\n");

    let text = [
        format!("*{ae}* just met with *{account}*"),
        String::new(),
        "*Participants*".to_string(),
        if participant_lines.is_empty() {
            "_(none detected)_".to_string()
        } else {
            participant_lines
        },
        String::new(),
        "*Call Notes*".to_string(),
        evaluation.call_notes.clone(),
        String::new(),
        format!("*Budget* {} ({}/5)", score_pips(b.budget.score), b.budget.score),
        b.budget.rationale.clone(),
        format!(
            "Alignment: {} · Prospect: {}",
            signals.budget.budget_alignment,
            sentiment_label(&signals.budget.prospect_sentiment.disposition)
        ),
        String::new(),
        format!(
            "*Authority* {} ({}/5)",
            score_pips(b.authority.score),
            b.authority.score
        ),
        b.authority.rationale.clone(),
        format!(
            "Prospect: {}",
            sentiment_label(&signals.authority.prospect_sentiment.disposition)
        ),
        String::new(),
        format!("*Need* {} ({}/5)", score_pips(b.need.score), b.need.score),
        b.need.rationale.clone(),
        format!(
            "Prospect: {}",
            sentiment_label(&signals.need.prospect_sentiment.disposition)
        ),
        String::new(),
        format!("*Timing* {} ({}/5)", score_pips(b.timing.score), b.timing.score),
        b.timing.rationale.clone(),
        format!(
            "Prospect: {}",
            sentiment_label(&signals.timing.prospect_sentiment.disposition)
        ),
        String::new(),
        format!(
            "*Stage 1 Probability:* {}% — {}",
            evaluation.stage_1_probability,
            evaluation.overall_status.as_str()
        ),
        evaluation.stage_1_reasoning.clone(),
    ]
    .join("\n");

    Digest {
        ae_name: context.account_owner.clone(),
        account_name: context.prospect_company.clone(),
        meeting_title: context.meeting_title.clone(),
        overall_status: evaluation.overall_status.as_str().to_string(),
        stage_1_probability: evaluation.stage_1_probability,
        text,
    }
}

/// Digest for the account owner: BANT summary plus next steps and
/// coaching notes.
pub fn format_owner_digest(
    evaluation: &Evaluation,
    _signals: &ExtractedSignals,
    context: &MeetingContext,
) -> Digest {
    let account = context
        .prospect_company
        .as_deref()
        .unwrap_or("Unknown Account");
    let b = &evaluation.bant_scores;

    let bullets = |items: &[String]| {
        if items.is_empty() {
            "_(none)_".to_string()
        } else {
            items
                .iter()
                .map(|s| format!("• {s}"))
                .collect::<Vec<_>>()
                .join("\n")
        }
    };

    let text = [
        format!(
            "*Your call with {account}* — {} ({}%)",
            evaluation.overall_status.as_str(),
            evaluation.stage_1_probability
        ),
        String::new(),
        "*BANT Summary*".to_string(),
        format!("Budget: {} — {}", score_pips(b.budget.score), b.budget.rationale),
        format!(
            "Authority: {} — {}",
            score_pips(b.authority.score),
            b.authority.rationale
        ),
        format!("Need: {} — {}", score_pips(b.need.score), b.need.rationale),
        format!("Timing: {} — {}", score_pips(b.timing.score), b.timing.rationale),
        String::new(),
        "*Next Steps*".to_string(),
        bullets(&evaluation.next_steps),
        String::new(),
        "*Coaching Notes*".to_string(),
        bullets(&evaluation.coaching_notes),
    ]
    .join("\n");

    Digest {
        ae_name: context.account_owner.clone(),
        account_name: context.prospect_company.clone(),
        meeting_title: context.meeting_title.clone(),
        overall_status: evaluation.overall_status.as_str().to_string(),
        stage_1_probability: evaluation.stage_1_probability,
        text,
    }
}

pub struct CallbackPoster {
    client: reqwest::Client,
}

impl Default for CallbackPoster {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackPoster {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Fire the single callback attempt. Failures are logged, not
    /// surfaced.
    pub async fn post(
        &self,
        callback_url: &str,
        evaluation: &Evaluation,
        signals: &ExtractedSignals,
        context: &MeetingContext,
    ) {
        let body = serde_json::json!({
            "growth_digest": format_growth_digest(evaluation, signals, context),
            "owner_digest": format_owner_digest(evaluation, signals, context),
            "evaluation": evaluation,
            "signals": signals,
        });

        let result = self
            .client
            .post(callback_url)
            .timeout(CALLBACK_TIMEOUT)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::info!(callback_url, "Callback delivered");
            }
            Ok(response) => {
                tracing::warn!(
                    callback_url,
                    status = response.status().as_u16(),
                    "Callback rejected"
                );
            }
            Err(e) => {
                tracing::warn!(callback_url, error = %e, "Callback delivery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BantScores, DimensionScore, OverallStatus, SignalValue,
    };
    use crate::domain::signals::{
        AccountSignals, AuthoritySignals, BudgetSignals, NeedSignals, TimingSignals,
    };
    use crate::domain::DealSegment;

    fn field(value: &str) -> crate::domain::SignalField {
        crate::domain::SignalField {
            value: SignalValue::Text(value.into()),
            evidence: vec!["quote".into()],
        }
    }

    fn sentiment() -> crate::domain::ProspectSentiment {
        crate::domain::ProspectSentiment {
            disposition: "positive".into(),
            summary: String::new(),
            evidence: vec![],
        }
    }

    fn signals() -> ExtractedSignals {
        ExtractedSignals {
            budget: BudgetSignals {
                discussed: field("yes"),
                details: field("50k"),
                budget_alignment: "aligned".into(),
                prospect_sentiment: sentiment(),
            },
            authority: AuthoritySignals {
                decision_maker_identified: field("yes"),
                decision_maker_name: field("Priya"),
                buying_process: field("unknown"),
                champion_identified: field("yes"),
                prospect_sentiment: sentiment(),
            },
            need: NeedSignals {
                pain_points: field("onboarding"),
                current_solution: field("spreadsheets"),
                urgency_level: field("high"),
                prospect_sentiment: sentiment(),
            },
            timing: TimingSignals {
                timeline: field("Q3"),
                upcoming_events: field("unknown"),
                demo_scheduled: field("yes"),
                next_steps: field("security review"),
                prospect_sentiment: sentiment(),
            },
            account: AccountSignals {
                company_name: field("Acme"),
                employee_count: field("unknown"),
                identity_provider: field("unknown"),
                scim_mentioned: field("unknown"),
                competitors_mentioned: field("unknown"),
            },
            participant_titles: vec![],
            call_summary: String::new(),
        }
    }

    fn evaluation() -> Evaluation {
        let dim = |score| DimensionScore {
            score,
            rationale: "rationale".into(),
        };
        Evaluation {
            bant_scores: BantScores {
                budget: dim(4),
                authority: dim(3),
                need: dim(5),
                timing: dim(2),
            },
            stage_1_probability: 70,
            stage_1_reasoning: "strong need".into(),
            overall_status: OverallStatus::Qualified,
            call_notes: "good call".into(),
            coaching_notes: vec!["ask about budget earlier".into()],
            next_steps: vec!["send proposal".into()],
            score: 70,
        }
    }

    fn context() -> MeetingContext {
        MeetingContext {
            our_company: "Console".into(),
            prospect_company: Some("Acme".into()),
            deal_segment: DealSegment::MidTier,
            meeting_title: "Console/Acme".into(),
            internal_attendees: vec!["Dana Reyes".into()],
            external_attendees: vec!["Priya Shah".into()],
            account_owner: Some("Dana Reyes".into()),
        }
    }

    #[test]
    fn test_score_pips() {
        assert_eq!(score_pips(0), "○○○○○");
        assert_eq!(score_pips(3), "●●●○○");
        assert_eq!(score_pips(5), "●●●●●");
    }

    #[test]
    fn test_growth_digest_headline() {
        let digest = format_growth_digest(&evaluation(), &signals(), &context());
        assert!(digest.text.starts_with("*Dana Reyes* just met with *Acme*"));
        assert!(digest.text.contains("*Stage 1 Probability:* 70% — Qualified"));
        assert_eq!(digest.overall_status, "Qualified");
    }

    #[test]
    fn test_owner_digest_includes_next_steps() {
        let digest = format_owner_digest(&evaluation(), &signals(), &context());
        assert!(digest.text.contains("• send proposal"));
        assert!(digest.text.contains("• ask about budget earlier"));
    }
}
