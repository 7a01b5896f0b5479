//! Signal extraction via the completion collaborator.

use anyhow::Result;

use crate::adapters::CompletionClient;
use crate::domain::{ExtractedSignals, Utterance, ValidationError};
use crate::ingest::MeetingContext;

pub const EXTRACTOR_PROMPT_VERSION: &str = "extractor_v1";

const EXTRACTOR_SYSTEM_PROMPT: &str = r#"You are a sales-call analyst. You will receive the transcript of a first qualifying sales call plus meeting context. Extract structured BANT signals as a single JSON object with this exact shape:

{
  "budget": {
    "discussed": {"value": <string|bool>, "evidence": [<verbatim quotes>]},
    "details": {"value": <string>, "evidence": [...]},
    "budget_alignment": "aligned" | "gap_small" | "gap_large" | "unknown",
    "prospect_sentiment": {"disposition": "positive"|"neutral"|"cautious"|"negative"|"unknown", "summary": <string>, "evidence": [...]}
  },
  "authority": {
    "decision_maker_identified": {...}, "decision_maker_name": {...},
    "buying_process": {...}, "champion_identified": {...},
    "prospect_sentiment": {...}
  },
  "need": {
    "pain_points": {...}, "current_solution": {...}, "urgency_level": {...},
    "prospect_sentiment": {...}
  },
  "timing": {
    "timeline": {...}, "upcoming_events": {...}, "demo_scheduled": {...},
    "next_steps": {...}, "prospect_sentiment": {...}
  },
  "account": {
    "company_name": {...}, "employee_count": {...}, "identity_provider": {...},
    "scim_mentioned": {...}, "competitors_mentioned": {...}
  },
  "participant_titles": [{"name": <string>, "title": <string>, "role_in_deal": "decision_maker"|"champion"|"evaluator"|"end_user"|"unknown"}],
  "call_summary": <string>
}

Rules:
- Use "unknown" (or false, or an empty list) when the transcript does not establish a value.
- Every populated value MUST include at least one verbatim evidence quote copied exactly from the transcript.
- Never invent evidence. Never paraphrase inside evidence quotes.
- Respond with the JSON object only."#;

/// Render utterances as the `[speaker]: text` transcript the prompt
/// expects.
pub fn build_transcript_text(utterances: &[Utterance]) -> String {
    utterances
        .iter()
        .map(|u| format!("[{}]: {}", u.speaker_label_raw, u.text_normalized))
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_user_message(utterances: &[Utterance], context: &MeetingContext) -> String {
    [
        "## MEETING CONTEXT".to_string(),
        format!("Our company: {}", context.our_company),
        format!(
            "Prospect company: {}",
            context.prospect_company.as_deref().unwrap_or("Unknown")
        ),
        format!("Meeting title: {}", context.meeting_title),
        String::new(),
        "## TRANSCRIPT".to_string(),
        build_transcript_text(utterances),
    ]
    .join("\n")
}

/// Run the Extract step: completion call, schema parse, evidence check.
pub async fn extract_signals(
    completion: &dyn CompletionClient,
    utterances: &[Utterance],
    context: &MeetingContext,
) -> Result<ExtractedSignals> {
    let user_message = build_user_message(utterances, context);
    let content = completion
        .complete_json(EXTRACTOR_SYSTEM_PROMPT, &user_message)
        .await?;

    let signals: ExtractedSignals =
        serde_json::from_str(&content).map_err(ValidationError::Malformed)?;
    signals.validate_evidence()?;

    Ok(signals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DealSegment;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct CannedCompletion(String);

    #[async_trait]
    impl CompletionClient for CannedCompletion {
        async fn complete_json(&self, _system: &str, _user: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn utterance(idx: u32, speaker: &str, text: &str) -> Utterance {
        Utterance {
            call_id: Uuid::new_v4(),
            idx,
            speaker_participant_id: None,
            speaker_label_raw: speaker.into(),
            timestamp_start_sec: None,
            timestamp_end_sec: None,
            text_raw: text.into(),
            text_normalized: text.into(),
        }
    }

    fn context() -> MeetingContext {
        MeetingContext {
            our_company: "Console".into(),
            prospect_company: Some("Acme".into()),
            deal_segment: DealSegment::MidTier,
            meeting_title: "Console/Acme".into(),
            internal_attendees: vec![],
            external_attendees: vec![],
            account_owner: None,
        }
    }

    fn unknown_field() -> serde_json::Value {
        serde_json::json!({"value": "unknown", "evidence": []})
    }

    fn sentiment() -> serde_json::Value {
        serde_json::json!({"disposition": "unknown", "summary": "", "evidence": []})
    }

    fn minimal_signals_json(budget_details: serde_json::Value) -> String {
        serde_json::json!({
            "budget": {
                "discussed": unknown_field(),
                "details": budget_details,
                "budget_alignment": "unknown",
                "prospect_sentiment": sentiment()
            },
            "authority": {
                "decision_maker_identified": unknown_field(),
                "decision_maker_name": unknown_field(),
                "buying_process": unknown_field(),
                "champion_identified": unknown_field(),
                "prospect_sentiment": sentiment()
            },
            "need": {
                "pain_points": unknown_field(),
                "current_solution": unknown_field(),
                "urgency_level": unknown_field(),
                "prospect_sentiment": sentiment()
            },
            "timing": {
                "timeline": unknown_field(),
                "upcoming_events": unknown_field(),
                "demo_scheduled": unknown_field(),
                "next_steps": unknown_field(),
                "prospect_sentiment": sentiment()
            },
            "account": {
                "company_name": unknown_field(),
                "employee_count": unknown_field(),
                "identity_provider": unknown_field(),
                "scim_mentioned": unknown_field(),
                "competitors_mentioned": unknown_field()
            },
            "participant_titles": [],
            "call_summary": "short call"
        })
        .to_string()
    }

    #[test]
    fn test_transcript_text_format() {
        let utterances = vec![
            utterance(0, "Priya", "We need SSO"),
            utterance(1, "Dana", "Got it"),
        ];
        assert_eq!(
            build_transcript_text(&utterances),
            "[Priya]: We need SSO\n[Dana]: Got it"
        );
    }

    #[tokio::test]
    async fn test_extract_accepts_valid_output() {
        let completion = CannedCompletion(minimal_signals_json(
            serde_json::json!({"value": "around $50k", "evidence": ["we have about 50k"]}),
        ));
        let signals = extract_signals(&completion, &[utterance(0, "P", "hi")], &context())
            .await
            .unwrap();
        assert_eq!(signals.call_summary, "short call");
    }

    #[tokio::test]
    async fn test_extract_rejects_populated_field_without_evidence() {
        let completion = CannedCompletion(minimal_signals_json(
            serde_json::json!({"value": "around $50k", "evidence": []}),
        ));
        let err = extract_signals(&completion, &[utterance(0, "P", "hi")], &context())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("budget.details"));
    }

    #[tokio::test]
    async fn test_extract_rejects_malformed_json() {
        let completion = CannedCompletion("not json at all".into());
        let err = extract_signals(&completion, &[utterance(0, "P", "hi")], &context())
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<ValidationError>().is_some());
    }
}
