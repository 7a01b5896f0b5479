//! Idempotency Integration Tests
//!
//! Intake admission and extraction-pass idempotence: the two places
//! where replays and duplicate triggers must be absorbed silently.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use salient::adapters::{CompletionClient, CrmClient, CrmDeal};
use salient::analysis::PhraseAnalyzer;
use salient::domain::{
    NormalizedCall, NormalizedParticipant, NormalizedUtterance, ParticipantRole,
};
use salient::storage::{AnalysisStore, CallStore, Database, EventStore};
use tempfile::TempDir;

struct CannedCompletion;

#[async_trait]
impl CompletionClient for CannedCompletion {
    async fn complete_json(&self, _system: &str, _user: &str) -> Result<String> {
        Ok(serde_json::json!({
            "problem_descriptions": [],
            "solution_seeking": [],
            "pain_language": [
                {"phrase": "manual exports", "verbatim_quote": "we do manual exports every week",
                 "speaker": "Priya", "context_summary": "reporting workflow"}
            ],
            "feature_mentions": [],
            "search_intent": []
        })
        .to_string())
    }
}

struct StaticDeals(Vec<CrmDeal>);

#[async_trait]
impl CrmClient for StaticDeals {
    async fn fetch_pipeline_deals(&self, _p: &str, _s: &str) -> Result<Vec<CrmDeal>> {
        Ok(self.0.clone())
    }
}

fn seed_call(db: &Database, recording_id: &str) -> uuid::Uuid {
    let calls = CallStore::new(db.clone());
    let normalized = NormalizedCall {
        external_recording_id: Some(recording_id.into()),
        title: format!("Console/Acme {recording_id}"),
        start_time: None,
        end_time: None,
        share_url: None,
        source_url: None,
        participants: vec![NormalizedParticipant {
            name: "Priya Shah".into(),
            email: Some("priya@acme.com".into()),
            role: ParticipantRole::External,
            source_label: Some("Priya".into()),
        }],
        utterances: vec![NormalizedUtterance {
            idx: 0,
            speaker_label_raw: "Priya".into(),
            timestamp_start_sec: Some(3),
            timestamp_end_sec: None,
            text_raw: "we do manual exports every week".into(),
            text_normalized: "we do manual exports every week".into(),
        }],
    };
    let (call_id, _) = calls.upsert_call(&normalized).unwrap();
    calls.replace_transcript(call_id, &normalized).unwrap();
    call_id
}

#[test]
fn test_admission_is_idempotent_per_external_id() {
    let temp = TempDir::new().unwrap();
    let db = Database::open(&temp.path().join("salient.db")).unwrap();
    let events = EventStore::new(db);

    let original = serde_json::json!({"title": "Console/Acme", "recording_id": 12});
    let replayed = serde_json::json!({"title": "TAMPERED", "recording_id": 99});

    let first = events
        .admit("evt_42", true, &serde_json::json!({}), &original)
        .unwrap();
    let second = events
        .admit("evt_42", true, &serde_json::json!({"retry": 1}), &replayed)
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.raw_body, original);
}

#[test]
fn test_manual_import_id_collides_with_itself() {
    let temp = TempDir::new().unwrap();
    let db = Database::open(&temp.path().join("salient.db")).unwrap();
    let events = EventStore::new(db);

    let body = serde_json::json!({"title": "Console/Acme", "recording_id": 12});
    let a = events
        .admit("manual_import_12", true, &serde_json::json!({}), &body)
        .unwrap();
    let b = events
        .admit("manual_import_12", true, &serde_json::json!({}), &body)
        .unwrap();
    assert_eq!(a.id, b.id);
}

#[tokio::test]
async fn test_extraction_pass_processes_each_call_once() {
    let temp = TempDir::new().unwrap();
    let db = Database::open(&temp.path().join("salient.db")).unwrap();

    let call_a = seed_call(&db, "100");
    let call_b = seed_call(&db, "200");

    let deals = vec![CrmDeal {
        deal_id: "d1".into(),
        deal_name: "Acme".into(),
        company_name: Some("Acme".into()),
        contact_emails: vec!["priya@acme.com".into()],
    }];
    let analyzer = PhraseAnalyzer::new(
        db.clone(),
        Arc::new(CannedCompletion),
        Arc::new(StaticDeals(deals)),
        "gpt-4o",
    );

    let (_, processed_first) = analyzer.run_extraction("pipe", "stage", false).await.unwrap();
    assert_eq!(processed_first, 2);

    // Second pass over the same candidate set is a no-op
    let (_, processed_second) = analyzer.run_extraction("pipe", "stage", false).await.unwrap();
    assert_eq!(processed_second, 0);

    // Exactly one extraction row per call across both passes
    let analysis = AnalysisStore::new(db);
    let since = chrono::Utc::now() - chrono::Duration::hours(1);
    let rows = analysis.extractions_since(since).unwrap();
    assert_eq!(rows.iter().filter(|(id, _)| *id == call_a).count(), 1);
    assert_eq!(rows.iter().filter(|(id, _)| *id == call_b).count(), 1);
}
