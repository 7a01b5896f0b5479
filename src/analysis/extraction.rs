//! Phrase-extraction passes and the weekly analysis driver.
//!
//! Extraction passes pick candidate calls (from CRM deal matching or
//! from qualified evaluations), skip anything already processed, and
//! persist one extraction row per call. A call with no counterpart
//! utterances gets an empty row so it is never re-examined. Per-call
//! failures are logged and skipped; the run records how many calls
//! actually made it through.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Local, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{CompletionClient, CrmClient, CrmDeal};
use crate::domain::{
    GeoRunType, ParticipantRole, PhraseExtraction, Utterance, ValidationError,
};
use crate::storage::{AnalysisStore, CallStore, Database, RunStore};

use super::aggregation::{
    aggregate_week, current_week_start, merge_with_baseline, BaselineStat,
};

pub const PHRASE_PROMPT_VERSION: &str = "phrase_extractor_v1";

const PHRASE_SYSTEM_PROMPT: &str = r#"You are a market-language analyst. You will receive only the prospect-side utterances of a sales call. Extract recurring, quotable phrases the prospect used, grouped into exactly these five categories, as a single JSON object:

{
  "problem_descriptions": [{"phrase": <short phrase>, "verbatim_quote": <exact sentence>, "speaker": <name>, "context_summary": <one line>}],
  "solution_seeking": [...],
  "pain_language": [...],
  "feature_mentions": [...],
  "search_intent": [...]
}

Rules:
- A phrase is 2-6 words the prospect actually said; the verbatim_quote is the full sentence it came from.
- Leave a category as an empty list when nothing fits.
- Respond with the JSON object only."#;

/// Deal-to-call matching: union of email and title matching, not
/// prioritized. Primary: external-participant email, case-insensitive.
/// Fallback: company-name substring against call titles.
pub fn match_deals_to_calls(
    calls: &CallStore,
    deals: &[CrmDeal],
) -> Result<Vec<Uuid>> {
    if deals.is_empty() {
        return Ok(Vec::new());
    }

    let all_emails: Vec<String> = deals
        .iter()
        .flat_map(|d| d.contact_emails.iter().cloned())
        .filter(|e| !e.is_empty())
        .collect();
    let company_names: Vec<String> = deals
        .iter()
        .filter_map(|d| d.company_name.clone())
        .collect();

    let mut matched: HashSet<Uuid> = HashSet::new();

    for batch in all_emails.chunks(50) {
        for id in calls.call_ids_by_external_emails(batch)? {
            matched.insert(id);
        }
    }

    if !company_names.is_empty() {
        for (id, title) in calls.call_titles()? {
            let title_lower = title.to_lowercase();
            if company_names
                .iter()
                .any(|c| title_lower.contains(&c.to_lowercase()))
            {
                matched.insert(id);
            }
        }
    }

    Ok(matched.into_iter().collect())
}

pub struct PhraseAnalyzer {
    calls: CallStore,
    runs: RunStore,
    analysis: AnalysisStore,
    completion: Arc<dyn CompletionClient>,
    crm: Arc<dyn CrmClient>,
    model: String,
}

impl PhraseAnalyzer {
    pub fn new(
        db: Database,
        completion: Arc<dyn CompletionClient>,
        crm: Arc<dyn CrmClient>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            calls: CallStore::new(db.clone()),
            runs: RunStore::new(db.clone()),
            analysis: AnalysisStore::new(db),
            completion,
            crm,
            model: model.into(),
        }
    }

    /// Daily or backfill extraction over CRM-matched calls.
    #[instrument(skip(self))]
    pub async fn run_extraction(
        &self,
        pipeline_id: &str,
        stage_id: &str,
        backfill: bool,
    ) -> Result<(Uuid, u32)> {
        let run_type = if backfill {
            GeoRunType::Backfill
        } else {
            GeoRunType::DailyExtraction
        };
        let config = serde_json::json!({
            "crm_pipeline_id": pipeline_id,
            "crm_stage_id": stage_id,
            "backfill": backfill,
        });
        let run = self.analysis.create_run(run_type, &config)?;

        let result = self
            .extraction_pass(run.id, pipeline_id, stage_id)
            .await;

        match result {
            Ok(processed) => {
                self.analysis.mark_run_succeeded(run.id, processed)?;
                Ok((run.id, processed))
            }
            Err(e) => {
                self.analysis.mark_run_failed(run.id, &e.to_string())?;
                Err(e)
            }
        }
    }

    /// Extraction over calls whose latest evaluation is "Qualified";
    /// skips the CRM entirely.
    #[instrument(skip(self))]
    pub async fn run_qualified_extraction(&self) -> Result<(Uuid, u32)> {
        let config = serde_json::json!({"filter": "qualified_only"});
        let run = self.analysis.create_run(GeoRunType::Backfill, &config)?;

        let result: Result<u32> = async {
            let qualified = self.runs.qualified_call_ids()?;
            info!(count = qualified.len(), "Qualified calls found");
            let unprocessed = self.analysis.filter_unprocessed(&qualified)?;
            info!(count = unprocessed.len(), "Calls needing phrase extraction");
            Ok(self.extract_calls(run.id, &unprocessed).await)
        }
        .await;

        match result {
            Ok(processed) => {
                self.analysis.mark_run_succeeded(run.id, processed)?;
                Ok((run.id, processed))
            }
            Err(e) => {
                self.analysis.mark_run_failed(run.id, &e.to_string())?;
                Err(e)
            }
        }
    }

    async fn extraction_pass(
        &self,
        run_id: Uuid,
        pipeline_id: &str,
        stage_id: &str,
    ) -> Result<u32> {
        let deals = self.crm.fetch_pipeline_deals(pipeline_id, stage_id).await?;
        info!(count = deals.len(), "CRM deals fetched");

        let matched = match_deals_to_calls(&self.calls, &deals)?;
        info!(count = matched.len(), "Calls matched to deals");

        let unprocessed = self.analysis.filter_unprocessed(&matched)?;
        info!(count = unprocessed.len(), "Calls needing phrase extraction");

        Ok(self.extract_calls(run_id, &unprocessed).await)
    }

    /// Run per-call extraction, tolerating individual failures.
    async fn extract_calls(&self, run_id: Uuid, call_ids: &[Uuid]) -> u32 {
        let mut processed = 0u32;
        for call_id in call_ids {
            match self.extract_for_call(run_id, *call_id).await {
                Ok(()) => {
                    processed += 1;
                    info!(%call_id, processed, total = call_ids.len(), "Call phrases extracted");
                }
                Err(e) => {
                    warn!(%call_id, error = %e, "Phrase extraction failed for call");
                }
            }
        }
        processed
    }

    /// Extract phrases from one call's counterpart utterances and
    /// persist the row. Zero counterpart utterances still persists an
    /// empty extraction to mark the call processed.
    async fn extract_for_call(&self, run_id: Uuid, call_id: Uuid) -> Result<()> {
        let participants = self.calls.participants(call_id)?;
        let external: Vec<_> = participants
            .iter()
            .filter(|p| p.role == ParticipantRole::External)
            .collect();

        let external_ids: HashSet<Uuid> = external.iter().map(|p| p.id).collect();

        let utterances = self.calls.utterances(call_id)?;
        let prospect_lines: Vec<(String, String)> = utterances
            .iter()
            .filter(|u| {
                u.speaker_participant_id
                    .map(|id| external_ids.contains(&id))
                    .unwrap_or(false)
            })
            .map(|u| (self.speaker_name(u, &external), u.text_normalized.clone()))
            .collect();

        let phrases = if prospect_lines.is_empty() {
            PhraseExtraction::default()
        } else {
            self.extract_phrases(&prospect_lines).await?
        };

        self.analysis.insert_extraction(
            call_id,
            run_id,
            &phrases,
            &self.model,
            PHRASE_PROMPT_VERSION,
        )?;
        Ok(())
    }

    fn speaker_name(
        &self,
        utterance: &Utterance,
        external: &[&crate::domain::Participant],
    ) -> String {
        utterance
            .speaker_participant_id
            .and_then(|id| external.iter().find(|p| p.id == id))
            .map(|p| p.name.clone())
            .unwrap_or_else(|| utterance.speaker_label_raw.clone())
    }

    async fn extract_phrases(&self, lines: &[(String, String)]) -> Result<PhraseExtraction> {
        let transcript = lines
            .iter()
            .map(|(speaker, text)| format!("[{speaker}]: {text}"))
            .collect::<Vec<_>>()
            .join("\n");
        let user_message = format!("## PROSPECT TRANSCRIPT\n{transcript}");

        let content = self
            .completion
            .complete_json(PHRASE_SYSTEM_PROMPT, &user_message)
            .await?;
        let phrases: PhraseExtraction =
            serde_json::from_str(&content).map_err(ValidationError::Malformed)?;
        Ok(phrases)
    }

    /// Weekly aggregation: this week's extractions merged into the
    /// cumulative statistics of the latest prior succeeded weekly run.
    #[instrument(skip(self))]
    pub async fn run_weekly_analysis(&self) -> Result<(Uuid, usize)> {
        let run = self
            .analysis
            .create_run(GeoRunType::WeeklyAnalysis, &serde_json::json!({}))?;

        let result: Result<(usize, usize)> = (|| {
            let week_start = current_week_start(Local::now());
            let extractions = self.analysis.extractions_since(week_start)?;
            info!(
                count = extractions.len(),
                %week_start,
                "Extractions in current week window"
            );

            let baseline = match self.analysis.latest_weekly_run(run.id)? {
                Some(prior) => {
                    let stats = self.analysis.statistics_for_run(prior.id)?;
                    stats
                        .into_iter()
                        .map(|s| {
                            (
                                (s.category, crate::domain::normalize_phrase_key(&s.phrase)),
                                BaselineStat {
                                    cumulative_frequency: s.cumulative_frequency,
                                    cumulative_call_count: s.cumulative_call_count,
                                    first_seen_at: s.first_seen_at,
                                },
                            )
                        })
                        .collect()
                }
                None => Default::default(),
            };

            let week = aggregate_week(&extractions);
            let rows = merge_with_baseline(run.id, week, &baseline, Utc::now());
            self.analysis.insert_statistics(&rows)?;

            Ok((extractions.len(), rows.len()))
        })();

        match result {
            Ok((extraction_count, unique_phrases)) => {
                self.analysis
                    .mark_run_succeeded(run.id, extraction_count as u32)?;
                info!(unique_phrases, "Weekly analysis complete");
                Ok((run.id, unique_phrases))
            }
            Err(e) => {
                self.analysis.mark_run_failed(run.id, &e.to_string())?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NormalizedCall, NormalizedParticipant, NormalizedUtterance};
    use async_trait::async_trait;

    struct CannedCompletion(String);

    #[async_trait]
    impl CompletionClient for CannedCompletion {
        async fn complete_json(&self, _system: &str, _user: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct NoDeals;

    #[async_trait]
    impl CrmClient for NoDeals {
        async fn fetch_pipeline_deals(&self, _p: &str, _s: &str) -> Result<Vec<CrmDeal>> {
            Ok(vec![])
        }
    }

    fn phrases_json() -> String {
        serde_json::json!({
            "problem_descriptions": [],
            "solution_seeking": [],
            "pain_language": [
                {"phrase": "integration issues", "verbatim_quote": "we keep hitting integration issues",
                 "speaker": "Priya", "context_summary": "tooling"}
            ],
            "feature_mentions": [],
            "search_intent": []
        })
        .to_string()
    }

    fn seed_call(db: &Database, recording_id: &str, with_external_utterance: bool) -> Uuid {
        let calls = CallStore::new(db.clone());
        let normalized = NormalizedCall {
            external_recording_id: Some(recording_id.into()),
            title: format!("Console/{recording_id}"),
            start_time: None,
            end_time: None,
            share_url: None,
            source_url: None,
            participants: vec![
                NormalizedParticipant {
                    name: "Priya Shah".into(),
                    email: Some("priya@acme.com".into()),
                    role: ParticipantRole::External,
                    source_label: Some("Priya".into()),
                },
                NormalizedParticipant {
                    name: "Dana Reyes".into(),
                    email: None,
                    role: ParticipantRole::Internal,
                    source_label: None,
                },
            ],
            utterances: if with_external_utterance {
                vec![
                    NormalizedUtterance {
                        idx: 0,
                        speaker_label_raw: "Priya".into(),
                        timestamp_start_sec: None,
                        timestamp_end_sec: None,
                        text_raw: "we keep hitting integration issues".into(),
                        text_normalized: "we keep hitting integration issues".into(),
                    },
                    NormalizedUtterance {
                        idx: 1,
                        speaker_label_raw: "Dana Reyes".into(),
                        timestamp_start_sec: None,
                        timestamp_end_sec: None,
                        text_raw: "noted".into(),
                        text_normalized: "noted".into(),
                    },
                ]
            } else {
                vec![NormalizedUtterance {
                    idx: 0,
                    speaker_label_raw: "Dana Reyes".into(),
                    timestamp_start_sec: None,
                    timestamp_end_sec: None,
                    text_raw: "internal only".into(),
                    text_normalized: "internal only".into(),
                }]
            },
        };
        let (call_id, _) = calls.upsert_call(&normalized).unwrap();
        calls.replace_transcript(call_id, &normalized).unwrap();
        call_id
    }

    fn analyzer(db: &Database) -> PhraseAnalyzer {
        PhraseAnalyzer::new(
            db.clone(),
            Arc::new(CannedCompletion(phrases_json())),
            Arc::new(NoDeals),
            "gpt-4o",
        )
    }

    #[tokio::test]
    async fn test_extract_for_call_persists_row() {
        let db = Database::in_memory().unwrap();
        let call_id = seed_call(&db, "1", true);
        let analyzer = analyzer(&db);
        let analysis = AnalysisStore::new(db.clone());
        let run = analysis
            .create_run(GeoRunType::DailyExtraction, &serde_json::json!({}))
            .unwrap();

        analyzer.extract_for_call(run.id, call_id).await.unwrap();

        assert!(analysis.filter_unprocessed(&[call_id]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_call_without_external_utterances_marked_processed() {
        let db = Database::in_memory().unwrap();
        let call_id = seed_call(&db, "2", false);
        let analyzer = analyzer(&db);
        let analysis = AnalysisStore::new(db.clone());
        let run = analysis
            .create_run(GeoRunType::DailyExtraction, &serde_json::json!({}))
            .unwrap();

        analyzer.extract_for_call(run.id, call_id).await.unwrap();

        // An empty extraction row exists, so the call is excluded from
        // future passes.
        assert!(analysis.filter_unprocessed(&[call_id]).unwrap().is_empty());
        let since = Utc::now() - chrono::Duration::hours(1);
        let rows = analysis.extractions_since(since).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.total_phrases(), 0);
    }

    #[tokio::test]
    async fn test_extraction_pass_is_idempotent() {
        let db = Database::in_memory().unwrap();
        let call_id = seed_call(&db, "3", true);
        let analyzer = analyzer(&db);
        let analysis = AnalysisStore::new(db.clone());

        let run1 = analysis
            .create_run(GeoRunType::DailyExtraction, &serde_json::json!({}))
            .unwrap();
        let processed1 = analyzer.extract_calls(run1.id, &analysis.filter_unprocessed(&[call_id]).unwrap()).await;
        assert_eq!(processed1, 1);

        let run2 = analysis
            .create_run(GeoRunType::DailyExtraction, &serde_json::json!({}))
            .unwrap();
        let processed2 = analyzer.extract_calls(run2.id, &analysis.filter_unprocessed(&[call_id]).unwrap()).await;
        assert_eq!(processed2, 0);

        // Exactly one extraction row for the call across both passes
        let since = Utc::now() - chrono::Duration::hours(1);
        let rows = analysis.extractions_since(since).unwrap();
        assert_eq!(rows.iter().filter(|(id, _)| *id == call_id).count(), 1);
    }

    #[tokio::test]
    async fn test_weekly_analysis_cumulative_merge() {
        let db = Database::in_memory().unwrap();
        let call_id = seed_call(&db, "4", true);
        let analyzer = analyzer(&db);
        let analysis = AnalysisStore::new(db.clone());

        // First weekly run over one extraction
        let run = analysis
            .create_run(GeoRunType::DailyExtraction, &serde_json::json!({}))
            .unwrap();
        analyzer.extract_for_call(run.id, call_id).await.unwrap();

        let (weekly1, unique1) = analyzer.run_weekly_analysis().await.unwrap();
        assert_eq!(unique1, 1);
        let stats1 = analysis.statistics_for_run(weekly1).unwrap();
        assert_eq!(stats1[0].cumulative_frequency, 1);

        // Second weekly run: same week window still contains the same
        // extraction, so counts add onto the prior cumulative
        let (weekly2, _) = analyzer.run_weekly_analysis().await.unwrap();
        let stats2 = analysis.statistics_for_run(weekly2).unwrap();
        assert_eq!(stats2[0].frequency, 1);
        assert_eq!(stats2[0].cumulative_frequency, 2);
        assert_eq!(stats2[0].first_seen_at, stats1[0].first_seen_at);
    }

    #[tokio::test]
    async fn test_qualified_extraction_with_no_candidates() {
        let db = Database::in_memory().unwrap();
        let analyzer = analyzer(&db);
        let (run_id, processed) = analyzer.run_qualified_extraction().await.unwrap();
        assert_eq!(processed, 0);

        let analysis = AnalysisStore::new(db);
        let runs = analysis.list_runs(5).unwrap();
        assert_eq!(runs[0].id, run_id);
        assert_eq!(runs[0].status, crate::domain::GeoRunStatus::Succeeded);
    }
}
