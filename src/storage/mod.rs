//! SQLite persistence.
//!
//! A single `Database` handle wraps the connection behind a mutex and is
//! cheap to clone; repositories (`EventStore`, `JobQueue`, `CallStore`,
//! `RunStore`, `AnalysisStore`) borrow it per aggregate. The file is
//! opened in WAL mode with a busy timeout so independent worker
//! processes can share it; correctness of contended job claims rests on
//! the conditional UPDATE in `queue`, not on the in-process mutex.

pub mod analysis;
pub mod calls;
pub mod events;
pub mod queue;
pub mod runs;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use thiserror::Error;

pub use analysis::AnalysisStore;
pub use calls::CallStore;
pub use events::{EventRecord, EventStore};
pub use queue::JobQueue;
pub use runs::RunStore;

/// Errors surfaced by the storage layer
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid stored value in column '{column}': {value}")]
    Corrupt { column: String, value: String },
}

/// Shared SQLite handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    rusqlite::Error::SqliteFailure(
                        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                        Some(e.to_string()),
                    )
                })?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=5000;
            PRAGMA foreign_keys=ON;
            "#,
        )?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_events (
            id TEXT PRIMARY KEY,
            external_event_id TEXT NOT NULL UNIQUE,
            verified INTEGER NOT NULL,
            raw_headers TEXT NOT NULL,
            raw_body TEXT NOT NULL,
            processing_status TEXT NOT NULL DEFAULT 'queued',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            payload TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            run_after TEXT NOT NULL,
            locked_by TEXT,
            locked_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_status_run_after
            ON jobs(status, run_after);

        CREATE TABLE IF NOT EXISTS calls (
            id TEXT PRIMARY KEY,
            external_recording_id TEXT UNIQUE,
            title TEXT NOT NULL,
            start_time TEXT,
            end_time TEXT,
            share_url TEXT,
            source_url TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS participants (
            id TEXT PRIMARY KEY,
            call_id TEXT NOT NULL REFERENCES calls(id),
            name TEXT NOT NULL,
            email TEXT,
            role TEXT NOT NULL,
            source_label TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_participants_call ON participants(call_id);
        CREATE INDEX IF NOT EXISTS idx_participants_email ON participants(email);

        CREATE TABLE IF NOT EXISTS utterances (
            call_id TEXT NOT NULL REFERENCES calls(id),
            idx INTEGER NOT NULL,
            speaker_participant_id TEXT,
            speaker_label_raw TEXT NOT NULL,
            timestamp_start_sec INTEGER,
            timestamp_end_sec INTEGER,
            text_raw TEXT NOT NULL,
            text_normalized TEXT NOT NULL,
            PRIMARY KEY (call_id, idx)
        );

        CREATE TABLE IF NOT EXISTS processing_runs (
            id TEXT PRIMARY KEY,
            call_id TEXT NOT NULL REFERENCES calls(id),
            status TEXT NOT NULL,
            rubric_version TEXT NOT NULL,
            extractor_prompt_version TEXT NOT NULL,
            evaluator_prompt_version TEXT NOT NULL,
            transcript_hash TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            error TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_processing_runs_call ON processing_runs(call_id);

        CREATE TABLE IF NOT EXISTS extracted_signals (
            id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES processing_runs(id),
            call_id TEXT NOT NULL REFERENCES calls(id),
            signals_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_extracted_signals_call ON extracted_signals(call_id);

        CREATE TABLE IF NOT EXISTS evaluations (
            id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES processing_runs(id),
            call_id TEXT NOT NULL REFERENCES calls(id),
            evaluation_json TEXT NOT NULL,
            overall_status TEXT NOT NULL,
            cross_check_mismatch TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_evaluations_call ON evaluations(call_id);
        CREATE INDEX IF NOT EXISTS idx_evaluations_status ON evaluations(overall_status);

        CREATE TABLE IF NOT EXISTS geo_analysis_runs (
            id TEXT PRIMARY KEY,
            type TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            calls_processed INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            config TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS call_phrase_extractions (
            id TEXT PRIMARY KEY,
            call_id TEXT NOT NULL REFERENCES calls(id),
            run_id TEXT NOT NULL REFERENCES geo_analysis_runs(id),
            phrases_json TEXT NOT NULL,
            model TEXT NOT NULL,
            prompt_version TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_phrase_extractions_call
            ON call_phrase_extractions(call_id);
        CREATE INDEX IF NOT EXISTS idx_phrase_extractions_created
            ON call_phrase_extractions(created_at);

        CREATE TABLE IF NOT EXISTS phrase_statistics (
            id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES geo_analysis_runs(id),
            phrase TEXT NOT NULL,
            category TEXT NOT NULL,
            frequency INTEGER NOT NULL,
            call_count INTEGER NOT NULL,
            cumulative_frequency INTEGER NOT NULL,
            cumulative_call_count INTEGER NOT NULL,
            example_contexts TEXT NOT NULL,
            first_seen_at TEXT NOT NULL,
            last_seen_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_phrase_statistics_run ON phrase_statistics(run_id);
        "#,
    )
}

/// RFC 3339 with fixed precision so stored timestamps sort lexically
pub(crate) fn encode_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(column: &str, value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StorageError::Corrupt {
            column: column.to_string(),
            value: value.to_string(),
        })
}

pub(crate) fn decode_opt_ts(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, StorageError> {
    value.map(|v| decode_ts(column, &v)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_initializes_idempotently() {
        let db = Database::in_memory().unwrap();
        // Re-running the batch must not fail
        init_schema(&db.conn()).unwrap();
    }

    #[test]
    fn test_timestamp_round_trip() {
        let now = Utc::now();
        let decoded = decode_ts("t", &encode_ts(now)).unwrap();
        assert_eq!(now.timestamp_micros(), decoded.timestamp_micros());
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("nested").join("salient.db");
        let _db = Database::open(&path).unwrap();
        assert!(path.exists());
    }
}
