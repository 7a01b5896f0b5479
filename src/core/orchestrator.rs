//! Per-call processing state machine.
//!
//! Normalize → Enrich → Extract → Evaluate → CrossCheck → Persist, one
//! ProcessingRun per attempt. Failures in the analysis steps mark the
//! run failed and re-raise so the owning job is retried; prior runs are
//! kept as history. Reprocessing skips Normalize and re-reads the
//! persisted transcript.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{CallbackPoster, CompletionClient, EnrichmentClient};
use crate::domain::job::ProcessMeetingPayload;
use crate::domain::{
    Evaluation, ExtractedSignals, NormalizedParticipant, ProcessingRun, Utterance,
};
use crate::ingest::{map_meeting, transcript_hash, MeetingContext, RecorderMeeting, TeamDirectory};
use crate::storage::{CallStore, Database, EventStore, RunStore};

use super::evaluator::{evaluate_signals, EVALUATOR_PROMPT_VERSION};
use super::extractor::{extract_signals, EXTRACTOR_PROMPT_VERSION};
use super::rules::{cross_check, RUBRIC_VERSION};

pub struct Orchestrator {
    events: EventStore,
    calls: CallStore,
    runs: RunStore,
    completion: Arc<dyn CompletionClient>,
    enrichment: Arc<dyn EnrichmentClient>,
    callbacks: CallbackPoster,
    directory: TeamDirectory,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        completion: Arc<dyn CompletionClient>,
        enrichment: Arc<dyn EnrichmentClient>,
        directory: TeamDirectory,
    ) -> Self {
        Self {
            events: EventStore::new(db.clone()),
            calls: CallStore::new(db.clone()),
            runs: RunStore::new(db),
            completion,
            enrichment,
            callbacks: CallbackPoster::new(),
            directory,
        }
    }

    /// Process an admitted meeting payload end to end.
    #[instrument(skip(self, payload), fields(event_id = %payload.webhook_event_id))]
    pub async fn process_meeting(&self, payload: &ProcessMeetingPayload) -> Result<ProcessingRun> {
        let event = self.events.get(payload.webhook_event_id)?;
        let meeting: RecorderMeeting = serde_json::from_value(event.raw_body.clone())
            .context("Admitted payload is not a recorder meeting")?;

        // Normalize
        let normalized = map_meeting(&meeting, &self.directory);
        let (call_id, existed) = self.calls.upsert_call(&normalized)?;
        if existed {
            info!(%call_id, "Recording already known, transcript will be replaced");
        } else {
            info!(%call_id, title = %normalized.title, "Call created");
        }
        self.calls.replace_transcript(call_id, &normalized)?;

        let utterances = self.calls.utterances(call_id)?;
        let context = MeetingContext::build(&normalized.title, &normalized.participants, &self.directory);

        self.run_analysis(call_id, context, &utterances, payload.callback_url.as_deref())
            .await
    }

    /// Re-run Enrich onward for a call that was normalized earlier.
    #[instrument(skip(self))]
    pub async fn reprocess_call(&self, call_id: Uuid) -> Result<ProcessingRun> {
        let call = self.calls.get_call(call_id)?;
        let participants: Vec<NormalizedParticipant> = self
            .calls
            .participants(call_id)?
            .into_iter()
            .map(|p| NormalizedParticipant {
                name: p.name,
                email: p.email,
                role: p.role,
                source_label: p.source_label,
            })
            .collect();
        let utterances = self.calls.utterances(call_id)?;

        let context = MeetingContext::build(&call.title, &participants, &self.directory);
        self.run_analysis(call_id, context, &utterances, None).await
    }

    /// Steps 2-6: Enrich through Persist, with run bookkeeping.
    async fn run_analysis(
        &self,
        call_id: Uuid,
        mut context: MeetingContext,
        utterances: &[Utterance],
        callback_url: Option<&str>,
    ) -> Result<ProcessingRun> {
        let hash = transcript_hash(
            utterances
                .iter()
                .map(|u| (u.idx, u.text_normalized.as_str())),
        );
        let run = self.runs.create_run(
            call_id,
            RUBRIC_VERSION,
            EXTRACTOR_PROMPT_VERSION,
            EVALUATOR_PROMPT_VERSION,
            &hash,
        )?;
        info!(run_id = %run.id, "Processing run started");

        match self.analysis_steps(&mut context, utterances).await {
            Ok((signals, evaluation, mismatch)) => {
                self.runs.insert_signals(run.id, call_id, &signals)?;
                self.runs
                    .insert_evaluation(run.id, call_id, &evaluation, mismatch.as_deref())?;
                self.runs.mark_run_succeeded(run.id)?;
                info!(run_id = %run.id, status = evaluation.overall_status.as_str(), "Processing run succeeded");

                if let Some(url) = callback_url {
                    self.callbacks
                        .post(url, &evaluation, &signals, &context)
                        .await;
                }

                self.runs.get_run(run.id).map_err(Into::into)
            }
            Err(e) => {
                self.runs.mark_run_failed(run.id, &e.to_string())?;
                Err(e)
            }
        }
    }

    /// Enrich → Extract → Evaluate → CrossCheck. Pure with respect to
    /// the database; persistence happens in the caller.
    async fn analysis_steps(
        &self,
        context: &mut MeetingContext,
        utterances: &[Utterance],
    ) -> Result<(ExtractedSignals, Evaluation, Option<String>)> {
        // Enrich (best-effort): segment from company size
        if let Some(company) = context.prospect_company.clone() {
            let profile = self.enrichment.lookup_company(&company).await;
            context.deal_segment = profile.segment;
            info!(
                company = %company,
                segment = context.deal_segment.as_str(),
                employee_count = ?profile.employee_count,
                "Enrichment resolved"
            );
        }

        // Extract
        let signals = extract_signals(self.completion.as_ref(), utterances, context).await?;

        // Evaluate
        let mut evaluation = evaluate_signals(self.completion.as_ref(), &signals, context).await?;

        // CrossCheck: deterministic override, never a failure
        let outcome = cross_check(&signals, &evaluation, context.deal_segment);
        if let Some(reason) = &outcome.mismatch {
            warn!(
                stated = evaluation.overall_status.as_str(),
                overridden = outcome.status.as_str(),
                %reason,
                "Cross-check mismatch, overriding status"
            );
            evaluation.overall_status = outcome.status;
        }

        Ok((signals, evaluation, outcome.mismatch))
    }
}
