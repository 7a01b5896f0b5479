//! Durable polled work queue.
//!
//! Claiming is a compare-and-swap: select the oldest eligible job, then
//! conditionally flip it to running guarded on the exact (id, status,
//! locked_at) that was observed. Zero rows affected means another worker
//! won the race; the caller just polls again. A select-then-update
//! without the status guard would double-claim under concurrency.
//!
//! Jobs stuck in `running` past the lease timeout (crashed worker) are
//! eligible for reclaim by the same path.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::domain::{Job, JobStatus, JobType};

use super::{decode_opt_ts, decode_ts, encode_ts, Database, StorageError};

/// Backoff base and cap, in seconds
const BACKOFF_BASE_SEC: i64 = 60;
const BACKOFF_CAP_SEC: i64 = 3600;

#[derive(Clone)]
pub struct JobQueue {
    db: Database,
    lease_timeout: Duration,
}

impl JobQueue {
    /// `lease_timeout` bounds how long a crashed worker can hold a job
    /// before another claimer may take it over.
    pub fn new(db: Database, lease_timeout: Duration) -> Self {
        Self { db, lease_timeout }
    }

    /// Insert a new queued job, eligible immediately.
    pub fn enqueue(
        &self,
        job_type: JobType,
        payload: &serde_json::Value,
    ) -> Result<Job, StorageError> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            job_type,
            status: JobStatus::Queued,
            payload: payload.clone(),
            attempts: 0,
            run_after: now,
            locked_by: None,
            locked_at: None,
            created_at: now,
            updated_at: now,
        };

        self.db.conn().execute(
            "INSERT INTO jobs (id, type, status, payload, attempts, run_after, created_at, updated_at)
             VALUES (?1, ?2, 'queued', ?3, 0, ?4, ?5, ?5)",
            params![
                job.id.to_string(),
                job_type.as_str(),
                serde_json::to_string(&job.payload)?,
                encode_ts(job.run_after),
                encode_ts(now),
            ],
        )?;

        Ok(job)
    }

    /// Claim the oldest eligible job for `worker_id`, or None when the
    /// queue is empty or a race was lost.
    pub fn claim(&self, worker_id: &str) -> Result<Option<Job>, StorageError> {
        self.claim_at(worker_id, Utc::now())
    }

    pub fn claim_at(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StorageError> {
        let conn = self.db.conn();
        let stale_before = now - self.lease_timeout;

        // Oldest first: queued-and-due, plus running rows whose lease has
        // lapsed (crashed worker reclaim).
        let candidate: Option<(String, String, Option<String>)> = conn
            .query_row(
                "SELECT id, status, locked_at FROM jobs
                 WHERE (status = 'queued' AND run_after <= ?1)
                    OR (status = 'running' AND locked_at < ?2)
                 ORDER BY created_at ASC, id ASC
                 LIMIT 1",
                params![encode_ts(now), encode_ts(stale_before)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (id, observed_status, observed_locked_at) = match candidate {
            Some(c) => c,
            None => return Ok(None),
        };

        // CAS: only wins if the row still looks exactly as observed.
        let updated = conn.execute(
            "UPDATE jobs
             SET status = 'running', locked_by = ?1, locked_at = ?2, updated_at = ?2
             WHERE id = ?3 AND status = ?4 AND COALESCE(locked_at, '') = COALESCE(?5, '')",
            params![worker_id, encode_ts(now), id, observed_status, observed_locked_at],
        )?;

        if updated == 0 {
            // Lost the race; caller polls again
            return Ok(None);
        }

        Self::fetch(&conn, &id).map(Some)
    }

    /// running → succeeded; idempotent when already succeeded.
    pub fn mark_succeeded(&self, job_id: Uuid) -> Result<(), StorageError> {
        let updated = self.db.conn().execute(
            "UPDATE jobs
             SET status = 'succeeded', locked_by = NULL, locked_at = NULL, updated_at = ?1
             WHERE id = ?2 AND status IN ('running', 'succeeded')",
            params![encode_ts(Utc::now()), job_id.to_string()],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound(format!("job {job_id}")));
        }
        Ok(())
    }

    /// Record a failed attempt. Retries go back to queued with
    /// exponential backoff (capped at one hour); exhausting the budget
    /// dead-letters the job for manual re-enqueue.
    pub fn mark_failed(&self, job_id: Uuid, max_attempts: u32) -> Result<JobStatus, StorageError> {
        self.mark_failed_at(job_id, max_attempts, Utc::now())
    }

    pub fn mark_failed_at(
        &self,
        job_id: Uuid,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<JobStatus, StorageError> {
        let conn = self.db.conn();

        let attempts: u32 = conn
            .query_row(
                "SELECT attempts FROM jobs WHERE id = ?1",
                params![job_id.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StorageError::NotFound(format!("job {job_id}")))?;

        let new_attempts = attempts + 1;
        if new_attempts >= max_attempts {
            conn.execute(
                "UPDATE jobs
                 SET status = 'dead', attempts = ?1, locked_by = NULL, locked_at = NULL,
                     updated_at = ?2
                 WHERE id = ?3",
                params![new_attempts, encode_ts(now), job_id.to_string()],
            )?;
            return Ok(JobStatus::Dead);
        }

        let backoff_sec = (BACKOFF_BASE_SEC << new_attempts).min(BACKOFF_CAP_SEC);
        let run_after = now + Duration::seconds(backoff_sec);
        conn.execute(
            "UPDATE jobs
             SET status = 'queued', attempts = ?1, run_after = ?2,
                 locked_by = NULL, locked_at = NULL, updated_at = ?3
             WHERE id = ?4",
            params![
                new_attempts,
                encode_ts(run_after),
                encode_ts(now),
                job_id.to_string()
            ],
        )?;
        Ok(JobStatus::Queued)
    }

    pub fn get(&self, job_id: Uuid) -> Result<Job, StorageError> {
        Self::fetch(&self.db.conn(), &job_id.to_string())
    }

    /// Dead-lettered jobs, oldest first.
    pub fn list_dead(&self) -> Result<Vec<Job>, StorageError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id FROM jobs WHERE status = 'dead' ORDER BY created_at ASC",
        )?;
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        ids.iter().map(|id| Self::fetch(&conn, id)).collect()
    }

    /// Manual recovery: dead → queued with a fresh retry budget.
    pub fn requeue_dead(&self) -> Result<usize, StorageError> {
        let now = Utc::now();
        let updated = self.db.conn().execute(
            "UPDATE jobs
             SET status = 'queued', attempts = 0, run_after = ?1,
                 locked_by = NULL, locked_at = NULL, updated_at = ?1
             WHERE status = 'dead'",
            params![encode_ts(now)],
        )?;
        Ok(updated)
    }

    fn fetch(conn: &rusqlite::Connection, id: &str) -> Result<Job, StorageError> {
        let row = conn
            .query_row(
                "SELECT id, type, status, payload, attempts, run_after,
                        locked_by, locked_at, created_at, updated_at
                 FROM jobs WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, String>(9)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| StorageError::NotFound(format!("job {id}")))?;

        let (id, job_type, status, payload, attempts, run_after, locked_by, locked_at, created_at, updated_at) =
            row;

        Ok(Job {
            id: Uuid::parse_str(&id).map_err(|_| StorageError::Corrupt {
                column: "id".into(),
                value: id.clone(),
            })?,
            job_type: JobType::parse(&job_type).ok_or_else(|| StorageError::Corrupt {
                column: "type".into(),
                value: job_type.clone(),
            })?,
            status: JobStatus::parse(&status).ok_or_else(|| StorageError::Corrupt {
                column: "status".into(),
                value: status.clone(),
            })?,
            payload: serde_json::from_str(&payload)?,
            attempts,
            run_after: decode_ts("run_after", &run_after)?,
            locked_by,
            locked_at: decode_opt_ts("locked_at", locked_at)?,
            created_at: decode_ts("created_at", &created_at)?,
            updated_at: decode_ts("updated_at", &updated_at)?,
        })
    }
}
