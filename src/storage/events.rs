//! Idempotent admission of raw inbound payloads.
//!
//! Admission is an upsert keyed by the provider-supplied event id: the
//! first call inserts, repeats return the stored record untouched. This
//! guards against provider retries and duplicate manual imports, which
//! use synthesized ids such as `manual_import_{recording_id}`.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::{decode_ts, encode_ts, Database, StorageError};

/// A stored inbound event
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub id: Uuid,
    pub external_event_id: String,
    pub verified: bool,
    pub raw_headers: serde_json::Value,
    pub raw_body: serde_json::Value,
    pub processing_status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct EventStore {
    db: Database,
}

impl EventStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Admit an inbound payload. Returns the stored record; the raw body
    /// of an already-admitted event is never mutated.
    pub fn admit(
        &self,
        external_event_id: &str,
        verified: bool,
        raw_headers: &serde_json::Value,
        raw_body: &serde_json::Value,
    ) -> Result<EventRecord, StorageError> {
        let conn = self.db.conn();

        if let Some(existing) = Self::find_by_external_id(&conn, external_event_id)? {
            return Ok(existing);
        }

        let record = EventRecord {
            id: Uuid::new_v4(),
            external_event_id: external_event_id.to_string(),
            verified,
            raw_headers: raw_headers.clone(),
            raw_body: raw_body.clone(),
            processing_status: "queued".to_string(),
            created_at: Utc::now(),
        };

        // A concurrent admitter may insert between the select and here;
        // the unique index makes the insert lose cleanly, after which the
        // stored row is authoritative.
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO webhook_events
                 (id, external_event_id, verified, raw_headers, raw_body, processing_status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id.to_string(),
                record.external_event_id,
                record.verified as i64,
                serde_json::to_string(&record.raw_headers)?,
                serde_json::to_string(&record.raw_body)?,
                record.processing_status,
                encode_ts(record.created_at),
            ],
        )?;

        if inserted == 0 {
            return Self::find_by_external_id(&conn, external_event_id)?.ok_or_else(|| {
                StorageError::NotFound(format!("webhook event {external_event_id}"))
            });
        }

        Ok(record)
    }

    /// Look up an admitted event by its row id.
    pub fn get(&self, id: Uuid) -> Result<EventRecord, StorageError> {
        let conn = self.db.conn();
        conn.query_row(
            "SELECT id, external_event_id, verified, raw_headers, raw_body, processing_status, created_at
             FROM webhook_events WHERE id = ?1",
            params![id.to_string()],
            Self::map_row,
        )
        .optional()?
        .transpose()?
        .ok_or_else(|| StorageError::NotFound(format!("webhook event {id}")))
    }

    fn find_by_external_id(
        conn: &rusqlite::Connection,
        external_event_id: &str,
    ) -> Result<Option<EventRecord>, StorageError> {
        conn.query_row(
            "SELECT id, external_event_id, verified, raw_headers, raw_body, processing_status, created_at
             FROM webhook_events WHERE external_event_id = ?1",
            params![external_event_id],
            Self::map_row,
        )
        .optional()?
        .transpose()
    }

    #[allow(clippy::type_complexity)]
    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<EventRecord, StorageError>> {
        let id: String = row.get(0)?;
        let external_event_id: String = row.get(1)?;
        let verified: i64 = row.get(2)?;
        let raw_headers: String = row.get(3)?;
        let raw_body: String = row.get(4)?;
        let processing_status: String = row.get(5)?;
        let created_at: String = row.get(6)?;

        Ok((|| {
            Ok(EventRecord {
                id: Uuid::parse_str(&id).map_err(|_| StorageError::Corrupt {
                    column: "id".into(),
                    value: id.clone(),
                })?,
                external_event_id,
                verified: verified != 0,
                raw_headers: serde_json::from_str(&raw_headers)?,
                raw_body: serde_json::from_str(&raw_body)?,
                processing_status,
                created_at: decode_ts("created_at", &created_at)?,
            })
        })())
    }
}
