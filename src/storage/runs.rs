//! Processing runs and their analysis outputs.
//!
//! Signals and evaluations are append-only; the most recent row by
//! created_at is authoritative for display. Prior runs are history.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::domain::{Evaluation, ExtractedSignals, ProcessingRun, RunStatus};

use super::{decode_opt_ts, decode_ts, encode_ts, Database, StorageError};

#[derive(Clone)]
pub struct RunStore {
    db: Database,
}

impl RunStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open a new run in `running` state.
    pub fn create_run(
        &self,
        call_id: Uuid,
        rubric_version: &str,
        extractor_prompt_version: &str,
        evaluator_prompt_version: &str,
        transcript_hash: &str,
    ) -> Result<ProcessingRun, StorageError> {
        let run = ProcessingRun {
            id: Uuid::new_v4(),
            call_id,
            status: RunStatus::Running,
            rubric_version: rubric_version.to_string(),
            extractor_prompt_version: extractor_prompt_version.to_string(),
            evaluator_prompt_version: evaluator_prompt_version.to_string(),
            transcript_hash: transcript_hash.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        };

        self.db.conn().execute(
            "INSERT INTO processing_runs
                 (id, call_id, status, rubric_version, extractor_prompt_version,
                  evaluator_prompt_version, transcript_hash, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.id.to_string(),
                call_id.to_string(),
                run.status.as_str(),
                run.rubric_version,
                run.extractor_prompt_version,
                run.evaluator_prompt_version,
                run.transcript_hash,
                encode_ts(run.started_at),
            ],
        )?;
        Ok(run)
    }

    pub fn mark_run_succeeded(&self, run_id: Uuid) -> Result<(), StorageError> {
        self.finish_run(run_id, RunStatus::Succeeded, None)
    }

    pub fn mark_run_failed(&self, run_id: Uuid, error: &str) -> Result<(), StorageError> {
        self.finish_run(run_id, RunStatus::Failed, Some(error))
    }

    fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<(), StorageError> {
        let updated = self.db.conn().execute(
            "UPDATE processing_runs SET status = ?1, finished_at = ?2, error = ?3 WHERE id = ?4",
            params![
                status.as_str(),
                encode_ts(Utc::now()),
                error,
                run_id.to_string()
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound(format!("processing run {run_id}")));
        }
        Ok(())
    }

    pub fn get_run(&self, run_id: Uuid) -> Result<ProcessingRun, StorageError> {
        let conn = self.db.conn();
        conn.query_row(
            "SELECT id, call_id, status, rubric_version, extractor_prompt_version,
                    evaluator_prompt_version, transcript_hash, started_at, finished_at, error
             FROM processing_runs WHERE id = ?1",
            params![run_id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                ))
            },
        )
        .optional()?
        .map(
            |(id, call_id, status, rubric, extractor, evaluator, hash, started, finished, error)| {
                Ok::<ProcessingRun, StorageError>(ProcessingRun {
                    id: parse_uuid("id", &id)?,
                    call_id: parse_uuid("call_id", &call_id)?,
                    status: RunStatus::parse(&status).ok_or_else(|| StorageError::Corrupt {
                        column: "status".into(),
                        value: status.clone(),
                    })?,
                    rubric_version: rubric,
                    extractor_prompt_version: extractor,
                    evaluator_prompt_version: evaluator,
                    transcript_hash: hash,
                    started_at: decode_ts("started_at", &started)?,
                    finished_at: decode_opt_ts("finished_at", finished)?,
                    error,
                })
            },
        )
        .transpose()?
        .ok_or_else(|| StorageError::NotFound(format!("processing run {run_id}")))
    }

    /// Persist the extracted signals for a run.
    pub fn insert_signals(
        &self,
        run_id: Uuid,
        call_id: Uuid,
        signals: &ExtractedSignals,
    ) -> Result<(), StorageError> {
        self.db.conn().execute(
            "INSERT INTO extracted_signals (id, run_id, call_id, signals_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Uuid::new_v4().to_string(),
                run_id.to_string(),
                call_id.to_string(),
                serde_json::to_string(signals)?,
                encode_ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Persist an evaluation, including any cross-check override note.
    pub fn insert_evaluation(
        &self,
        run_id: Uuid,
        call_id: Uuid,
        evaluation: &Evaluation,
        cross_check_mismatch: Option<&str>,
    ) -> Result<(), StorageError> {
        self.db.conn().execute(
            "INSERT INTO evaluations
                 (id, run_id, call_id, evaluation_json, overall_status, cross_check_mismatch, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Uuid::new_v4().to_string(),
                run_id.to_string(),
                call_id.to_string(),
                serde_json::to_string(evaluation)?,
                evaluation.overall_status.as_str(),
                cross_check_mismatch,
                encode_ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Most recent evaluation for a call, if any.
    pub fn latest_evaluation(&self, call_id: Uuid) -> Result<Option<Evaluation>, StorageError> {
        let json: Option<String> = self
            .db
            .conn()
            .query_row(
                "SELECT evaluation_json FROM evaluations
                 WHERE call_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                params![call_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(StorageError::from))
            .transpose()
    }

    /// Distinct call ids whose stored evaluation status is "Qualified".
    pub fn qualified_call_ids(&self) -> Result<Vec<Uuid>, StorageError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT call_id FROM evaluations WHERE overall_status = 'Qualified'",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            let id = row?;
            ids.push(parse_uuid("call_id", &id)?);
        }
        Ok(ids)
    }
}

fn parse_uuid(column: &str, value: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(value).map_err(|_| StorageError::Corrupt {
        column: column.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BantScores, DimensionScore, OverallStatus};
    use crate::storage::CallStore;

    fn seeded() -> (RunStore, CallStore, Uuid) {
        let db = Database::in_memory().unwrap();
        let calls = CallStore::new(db.clone());
        let (call_id, _) = calls
            .upsert_call(&crate::domain::NormalizedCall {
                external_recording_id: Some("1".into()),
                title: "Console/Acme".into(),
                start_time: None,
                end_time: None,
                share_url: None,
                source_url: None,
                participants: vec![],
                utterances: vec![],
            })
            .unwrap();
        (RunStore::new(db), calls, call_id)
    }

    fn evaluation(status: OverallStatus) -> Evaluation {
        let dim = |score| DimensionScore {
            score,
            rationale: String::new(),
        };
        Evaluation {
            bant_scores: BantScores {
                budget: dim(3),
                authority: dim(3),
                need: dim(3),
                timing: dim(3),
            },
            stage_1_probability: 55,
            stage_1_reasoning: String::new(),
            overall_status: status,
            call_notes: String::new(),
            coaching_notes: vec![],
            next_steps: vec![],
            score: 55,
        }
    }

    #[test]
    fn test_run_lifecycle() {
        let (runs, _, call_id) = seeded();
        let run = runs
            .create_run(call_id, "bant_v1", "extractor_v1", "evaluator_v2", "abc")
            .unwrap();
        assert_eq!(run.status, RunStatus::Running);

        runs.mark_run_failed(run.id, "completion timeout").unwrap();
        let loaded = runs.get_run(run.id).unwrap();
        assert_eq!(loaded.status, RunStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("completion timeout"));
        assert!(loaded.finished_at.is_some());
    }

    #[test]
    fn test_latest_evaluation_wins() {
        let (runs, _, call_id) = seeded();
        let r1 = runs.create_run(call_id, "v1", "v1", "v2", "h").unwrap();
        let r2 = runs.create_run(call_id, "v1", "v1", "v2", "h").unwrap();

        runs.insert_evaluation(r1.id, call_id, &evaluation(OverallStatus::NeedsWork), None)
            .unwrap();
        runs.insert_evaluation(
            r2.id,
            call_id,
            &evaluation(OverallStatus::Qualified),
            Some("override"),
        )
        .unwrap();

        let latest = runs.latest_evaluation(call_id).unwrap().unwrap();
        assert_eq!(latest.overall_status, OverallStatus::Qualified);
    }

    #[test]
    fn test_qualified_call_ids() {
        let (runs, _, call_id) = seeded();
        let run = runs.create_run(call_id, "v1", "v1", "v2", "h").unwrap();
        runs.insert_evaluation(run.id, call_id, &evaluation(OverallStatus::Qualified), None)
            .unwrap();

        assert_eq!(runs.qualified_call_ids().unwrap(), vec![call_id]);
    }
}
