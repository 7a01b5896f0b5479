//! Phrase-analysis persistence: geo runs, per-call extractions, and
//! cumulative statistics.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::domain::{
    GeoAnalysisRun, GeoRunStatus, GeoRunType, PhraseCategory, PhraseContext, PhraseExtraction,
    PhraseStatistic,
};

use super::{decode_opt_ts, decode_ts, encode_ts, Database, StorageError};

/// Lookup batch size for already-processed filtering
const ID_BATCH_SIZE: usize = 50;

/// Insert batch size for statistics rows
const STAT_BATCH_SIZE: usize = 500;

#[derive(Clone)]
pub struct AnalysisStore {
    db: Database,
}

impl AnalysisStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ── Run bookkeeping ────────────────────────────────────────────

    pub fn create_run(
        &self,
        run_type: GeoRunType,
        config: &serde_json::Value,
    ) -> Result<GeoAnalysisRun, StorageError> {
        let run = GeoAnalysisRun {
            id: Uuid::new_v4(),
            run_type,
            status: GeoRunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            calls_processed: 0,
            error: None,
            config: config.clone(),
        };

        self.db.conn().execute(
            "INSERT INTO geo_analysis_runs (id, type, status, started_at, config)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.id.to_string(),
                run_type.as_str(),
                run.status.as_str(),
                encode_ts(run.started_at),
                serde_json::to_string(&run.config)?,
            ],
        )?;
        Ok(run)
    }

    pub fn mark_run_succeeded(
        &self,
        run_id: Uuid,
        calls_processed: u32,
    ) -> Result<(), StorageError> {
        let updated = self.db.conn().execute(
            "UPDATE geo_analysis_runs
             SET status = 'succeeded', finished_at = ?1, calls_processed = ?2
             WHERE id = ?3",
            params![encode_ts(Utc::now()), calls_processed, run_id.to_string()],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound(format!("geo run {run_id}")));
        }
        Ok(())
    }

    pub fn mark_run_failed(&self, run_id: Uuid, error: &str) -> Result<(), StorageError> {
        let updated = self.db.conn().execute(
            "UPDATE geo_analysis_runs SET status = 'failed', finished_at = ?1, error = ?2
             WHERE id = ?3",
            params![encode_ts(Utc::now()), error, run_id.to_string()],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound(format!("geo run {run_id}")));
        }
        Ok(())
    }

    /// Recent runs, newest first.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<GeoAnalysisRun>, StorageError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, type, status, started_at, finished_at, calls_processed, error, config
             FROM geo_analysis_runs ORDER BY started_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], Self::map_run_row)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row??);
        }
        Ok(runs)
    }

    /// Most recent succeeded weekly run, excluding `excluding` (the run
    /// currently in flight).
    pub fn latest_weekly_run(
        &self,
        excluding: Uuid,
    ) -> Result<Option<GeoAnalysisRun>, StorageError> {
        let conn = self.db.conn();
        conn.query_row(
            "SELECT id, type, status, started_at, finished_at, calls_processed, error, config
             FROM geo_analysis_runs
             WHERE type = 'weekly_analysis' AND status = 'succeeded' AND id != ?1
             ORDER BY started_at DESC, rowid DESC LIMIT 1",
            params![excluding.to_string()],
            Self::map_run_row,
        )
        .optional()?
        .transpose()
    }

    #[allow(clippy::type_complexity)]
    fn map_run_row(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<Result<GeoAnalysisRun, StorageError>> {
        let id: String = row.get(0)?;
        let run_type: String = row.get(1)?;
        let status: String = row.get(2)?;
        let started_at: String = row.get(3)?;
        let finished_at: Option<String> = row.get(4)?;
        let calls_processed: u32 = row.get(5)?;
        let error: Option<String> = row.get(6)?;
        let config: String = row.get(7)?;

        Ok((|| {
            Ok(GeoAnalysisRun {
                id: Uuid::parse_str(&id).map_err(|_| StorageError::Corrupt {
                    column: "id".into(),
                    value: id.clone(),
                })?,
                run_type: GeoRunType::parse(&run_type).ok_or_else(|| StorageError::Corrupt {
                    column: "type".into(),
                    value: run_type.clone(),
                })?,
                status: GeoRunStatus::parse(&status).ok_or_else(|| StorageError::Corrupt {
                    column: "status".into(),
                    value: status.clone(),
                })?,
                started_at: decode_ts("started_at", &started_at)?,
                finished_at: decode_opt_ts("finished_at", finished_at)?,
                calls_processed,
                error,
                config: serde_json::from_str(&config)?,
            })
        })())
    }

    // ── Per-call extractions ───────────────────────────────────────

    /// Persist one extraction row for a call; an empty extraction still
    /// marks the call processed.
    pub fn insert_extraction(
        &self,
        call_id: Uuid,
        run_id: Uuid,
        phrases: &PhraseExtraction,
        model: &str,
        prompt_version: &str,
    ) -> Result<(), StorageError> {
        self.db.conn().execute(
            "INSERT INTO call_phrase_extractions
                 (id, call_id, run_id, phrases_json, model, prompt_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Uuid::new_v4().to_string(),
                call_id.to_string(),
                run_id.to_string(),
                serde_json::to_string(phrases)?,
                model,
                prompt_version,
                encode_ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Drop call ids that already have an extraction row. Lookups are
    /// batched to keep statements bounded.
    pub fn filter_unprocessed(&self, call_ids: &[Uuid]) -> Result<Vec<Uuid>, StorageError> {
        if call_ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.db.conn();
        let mut processed: std::collections::HashSet<String> = std::collections::HashSet::new();

        for batch in call_ids.chunks(ID_BATCH_SIZE) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "SELECT DISTINCT call_id FROM call_phrase_extractions WHERE call_id IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql)?;
            let ids: Vec<String> = batch.iter().map(|id| id.to_string()).collect();
            let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), |row| {
                row.get::<_, String>(0)
            })?;
            for row in rows {
                processed.insert(row?);
            }
        }

        Ok(call_ids
            .iter()
            .filter(|id| !processed.contains(&id.to_string()))
            .copied()
            .collect())
    }

    /// Extractions created at or after `since`, with their call ids.
    pub fn extractions_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(Uuid, PhraseExtraction)>, StorageError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT call_id, phrases_json FROM call_phrase_extractions WHERE created_at >= ?1",
        )?;
        let rows = stmt.query_map(params![encode_ts(since)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (call_id, json) = row?;
            out.push((
                Uuid::parse_str(&call_id).map_err(|_| StorageError::Corrupt {
                    column: "call_id".into(),
                    value: call_id,
                })?,
                serde_json::from_str(&json)?,
            ));
        }
        Ok(out)
    }

    // ── Statistics ─────────────────────────────────────────────────

    /// Insert statistics rows in bounded batches inside transactions.
    pub fn insert_statistics(&self, stats: &[PhraseStatistic]) -> Result<(), StorageError> {
        let mut conn = self.db.conn();

        for batch in stats.chunks(STAT_BATCH_SIZE) {
            let tx = conn.transaction()?;
            for stat in batch {
                tx.execute(
                    "INSERT INTO phrase_statistics
                         (id, run_id, phrase, category, frequency, call_count,
                          cumulative_frequency, cumulative_call_count, example_contexts,
                          first_seen_at, last_seen_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        Uuid::new_v4().to_string(),
                        stat.run_id.to_string(),
                        stat.phrase,
                        stat.category.as_str(),
                        stat.frequency,
                        stat.call_count,
                        stat.cumulative_frequency,
                        stat.cumulative_call_count,
                        serde_json::to_string(&stat.example_contexts)?,
                        encode_ts(stat.first_seen_at),
                        encode_ts(stat.last_seen_at),
                    ],
                )?;
            }
            tx.commit()?;
        }
        Ok(())
    }

    /// All statistics rows for a run.
    pub fn statistics_for_run(&self, run_id: Uuid) -> Result<Vec<PhraseStatistic>, StorageError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT phrase, category, frequency, call_count, cumulative_frequency,
                    cumulative_call_count, example_contexts, first_seen_at, last_seen_at
             FROM phrase_statistics WHERE run_id = ?1
             ORDER BY cumulative_frequency DESC, phrase ASC",
        )?;
        let rows = stmt.query_map(params![run_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, u32>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;

        let mut stats = Vec::new();
        for row in rows {
            let (phrase, category, frequency, call_count, cum_freq, cum_calls, contexts, first, last) =
                row?;
            let contexts: Vec<PhraseContext> = serde_json::from_str(&contexts)?;
            stats.push(PhraseStatistic {
                run_id,
                phrase,
                category: PhraseCategory::parse(&category).ok_or_else(|| {
                    StorageError::Corrupt {
                        column: "category".into(),
                        value: category.clone(),
                    }
                })?,
                frequency,
                call_count,
                cumulative_frequency: cum_freq,
                cumulative_call_count: cum_calls,
                example_contexts: contexts,
                first_seen_at: decode_ts("first_seen_at", &first)?,
                last_seen_at: decode_ts("last_seen_at", &last)?,
            });
        }
        Ok(stats)
    }
}
