//! Polling worker: claims jobs and dispatches them to the pipeline or
//! the phrase analyzer.
//!
//! Any number of workers may run against the same queue; the claim CAS
//! is the only coordination. The loop blocks only on I/O and sleeps the
//! poll interval when the queue is empty. Shutdown is an explicit watch
//! signal so the loop terminates cleanly in tests and on ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analysis::PhraseAnalyzer;
use crate::domain::job::{ExtractPhrasesPayload, ProcessMeetingPayload, ReprocessCallPayload};
use crate::domain::{Job, JobType};
use crate::storage::JobQueue;

use super::orchestrator::Orchestrator;

pub struct Worker {
    queue: JobQueue,
    orchestrator: Arc<Orchestrator>,
    analyzer: Arc<PhraseAnalyzer>,
    worker_id: String,
    poll_interval: Duration,
    max_attempts: u32,
}

impl Worker {
    pub fn new(
        queue: JobQueue,
        orchestrator: Arc<Orchestrator>,
        analyzer: Arc<PhraseAnalyzer>,
        poll_interval: Duration,
        max_attempts: u32,
    ) -> Self {
        let worker_id = format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]);
        Self {
            queue,
            orchestrator,
            analyzer,
            worker_id,
            poll_interval,
            max_attempts,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Poll until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(worker_id = %self.worker_id, "Worker starting (poll mode)");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let job = self.queue.claim(&self.worker_id)?;
            match job {
                Some(job) => self.handle(job).await,
                None => {
                    // Idle: wait a poll interval or the shutdown signal,
                    // whichever comes first
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        info!(worker_id = %self.worker_id, "Worker stopped");
        Ok(())
    }

    /// Drain up to `max_jobs` eligible jobs, then return the number
    /// processed. For cron-style invocation.
    pub async fn run_once(&self, max_jobs: usize) -> Result<usize> {
        let mut processed = 0;
        for _ in 0..max_jobs {
            match self.queue.claim(&self.worker_id)? {
                Some(job) => {
                    self.handle(job).await;
                    processed += 1;
                }
                None => break,
            }
        }
        Ok(processed)
    }

    async fn handle(&self, job: Job) {
        info!(job_id = %job.id, job_type = job.job_type.as_str(), attempts = job.attempts, "Claimed job");

        match self.dispatch(&job).await {
            Ok(()) => {
                if let Err(e) = self.queue.mark_succeeded(job.id) {
                    error!(job_id = %job.id, error = %e, "Failed to mark job succeeded");
                } else {
                    info!(job_id = %job.id, "Job succeeded");
                }
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Job failed");
                match self.queue.mark_failed(job.id, self.max_attempts) {
                    Ok(status) => {
                        info!(job_id = %job.id, status = status.as_str(), "Job rescheduled")
                    }
                    Err(mark_err) => {
                        error!(job_id = %job.id, error = %mark_err, "Failed to mark job failed")
                    }
                }
            }
        }
    }

    async fn dispatch(&self, job: &Job) -> Result<()> {
        match job.job_type {
            JobType::ProcessMeeting => {
                let payload: ProcessMeetingPayload = serde_json::from_value(job.payload.clone())
                    .context("Invalid PROCESS_MEETING payload")?;
                self.orchestrator.process_meeting(&payload).await?;
            }
            JobType::ReprocessCall => {
                let payload: ReprocessCallPayload = serde_json::from_value(job.payload.clone())
                    .context("Invalid REPROCESS_CALL payload")?;
                self.orchestrator.reprocess_call(payload.call_id).await?;
            }
            JobType::ExtractPhrases => {
                let payload: ExtractPhrasesPayload = serde_json::from_value(job.payload.clone())
                    .context("Invalid EXTRACT_PHRASES payload")?;
                self.analyzer
                    .run_extraction(
                        &payload.crm_pipeline_id,
                        &payload.crm_stage_id,
                        payload.backfill,
                    )
                    .await?;
            }
            JobType::RunWeeklyAnalysis => {
                self.analyzer.run_weekly_analysis().await?;
            }
        }
        Ok(())
    }
}
