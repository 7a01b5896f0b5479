//! Qualification evaluation via the completion collaborator.

use anyhow::Result;

use crate::adapters::CompletionClient;
use crate::domain::{Evaluation, ExtractedSignals, ValidationError};
use crate::ingest::MeetingContext;

pub const EVALUATOR_PROMPT_VERSION: &str = "evaluator_v2";

const EVALUATOR_SYSTEM_PROMPT: &str = r#"You are a sales qualification judge. You will receive structured BANT signals extracted from a first qualifying call, plus meeting context. Produce a judgment as a single JSON object:

{
  "bant_scores": {
    "budget": {"score": <1-5>, "rationale": <string>},
    "authority": {"score": <1-5>, "rationale": <string>},
    "need": {"score": <1-5>, "rationale": <string>},
    "timing": {"score": <1-5>, "rationale": <string>}
  },
  "stage_1_probability": <0-100>,
  "stage_1_reasoning": <string>,
  "overall_status": "Qualified" | "Needs Work" | "Unqualified",
  "call_notes": <string>,
  "coaching_notes": [<string>],
  "next_steps": [<string>],
  "score": <0-100>
}

Scoring guidance:
- 1 means the dimension was absent or actively negative, 5 means firmly established.
- Enterprise-segment deals rarely discuss budget on a first call; do not punish budget for that segment.
- Ground every rationale in the provided signals; do not invent facts.
- Respond with the JSON object only."#;

fn build_user_message(signals: &ExtractedSignals, context: &MeetingContext) -> String {
    [
        "## EXTRACTED SIGNALS".to_string(),
        serde_json::to_string_pretty(signals).unwrap_or_default(),
        String::new(),
        "## MEETING CONTEXT".to_string(),
        format!("Our company: {}", context.our_company),
        format!(
            "Prospect company: {}",
            context.prospect_company.as_deref().unwrap_or("Unknown")
        ),
        format!("Deal segment: {}", context.deal_segment.as_str()),
        format!("Meeting title: {}", context.meeting_title),
        format!(
            "Internal attendees: {}",
            if context.internal_attendees.is_empty() {
                "None listed".to_string()
            } else {
                context.internal_attendees.join(", ")
            }
        ),
        format!(
            "External attendees: {}",
            if context.external_attendees.is_empty() {
                "None listed".to_string()
            } else {
                context.external_attendees.join(", ")
            }
        ),
    ]
    .join("\n")
}

/// Run the Evaluate step: completion call, schema parse, range check.
pub async fn evaluate_signals(
    completion: &dyn CompletionClient,
    signals: &ExtractedSignals,
    context: &MeetingContext,
) -> Result<Evaluation> {
    let user_message = build_user_message(signals, context);
    let content = completion
        .complete_json(EVALUATOR_SYSTEM_PROMPT, &user_message)
        .await?;

    let evaluation: Evaluation =
        serde_json::from_str(&content).map_err(ValidationError::Malformed)?;
    evaluation.validate()?;

    Ok(evaluation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DealSegment, OverallStatus};
    use async_trait::async_trait;

    struct CannedCompletion(String);

    #[async_trait]
    impl CompletionClient for CannedCompletion {
        async fn complete_json(&self, _system: &str, _user: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn empty_signals() -> ExtractedSignals {
        let field = serde_json::json!({"value": "unknown", "evidence": []});
        let sentiment = serde_json::json!({"disposition": "unknown", "summary": "", "evidence": []});
        serde_json::from_value(serde_json::json!({
            "budget": {"discussed": field, "details": field, "budget_alignment": "unknown", "prospect_sentiment": sentiment},
            "authority": {"decision_maker_identified": field, "decision_maker_name": field, "buying_process": field, "champion_identified": field, "prospect_sentiment": sentiment},
            "need": {"pain_points": field, "current_solution": field, "urgency_level": field, "prospect_sentiment": sentiment},
            "timing": {"timeline": field, "upcoming_events": field, "demo_scheduled": field, "next_steps": field, "prospect_sentiment": sentiment},
            "account": {"company_name": field, "employee_count": field, "identity_provider": field, "scim_mentioned": field, "competitors_mentioned": field},
            "participant_titles": [],
            "call_summary": ""
        }))
        .unwrap()
    }

    fn context() -> MeetingContext {
        MeetingContext {
            our_company: "Console".into(),
            prospect_company: None,
            deal_segment: DealSegment::Enterprise,
            meeting_title: "Console/Acme".into(),
            internal_attendees: vec![],
            external_attendees: vec![],
            account_owner: None,
        }
    }

    fn evaluation_json(budget_score: u8) -> String {
        serde_json::json!({
            "bant_scores": {
                "budget": {"score": budget_score, "rationale": "r"},
                "authority": {"score": 3, "rationale": "r"},
                "need": {"score": 4, "rationale": "r"},
                "timing": {"score": 3, "rationale": "r"}
            },
            "stage_1_probability": 60,
            "stage_1_reasoning": "solid need",
            "overall_status": "Needs Work",
            "call_notes": "notes",
            "coaching_notes": [],
            "next_steps": ["book demo"],
            "score": 60
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_evaluate_accepts_valid_output() {
        let completion = CannedCompletion(evaluation_json(2));
        let evaluation = evaluate_signals(&completion, &empty_signals(), &context())
            .await
            .unwrap();
        assert_eq!(evaluation.overall_status, OverallStatus::NeedsWork);
        assert_eq!(evaluation.bant_scores.need.score, 4);
    }

    #[tokio::test]
    async fn test_evaluate_rejects_out_of_range_score() {
        let completion = CannedCompletion(evaluation_json(0));
        let err = evaluate_signals(&completion, &empty_signals(), &context())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bant_scores.budget.score"));
    }

    #[test]
    fn test_user_message_includes_segment() {
        let message = build_user_message(&empty_signals(), &context());
        assert!(message.contains("Deal segment: enterprise"));
        assert!(message.contains("Internal attendees: None listed"));
    }
}
