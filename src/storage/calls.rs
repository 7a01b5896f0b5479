//! Calls, participants, and utterances.
//!
//! A call is created once per distinct recording and never re-inserted;
//! participants and utterances are replaced wholesale on each
//! normalization pass. Only one active job normalizes a given call at a
//! time, so the delete+reinsert has no partial-update race to defend
//! against.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::domain::{
    Call, NormalizedCall, Participant, ParticipantRole, Utterance,
};

use super::{decode_opt_ts, decode_ts, encode_ts, Database, StorageError};

#[derive(Clone)]
pub struct CallStore {
    db: Database,
}

impl CallStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Find an existing call by recording id or share URL, else insert
    /// one. Returns the call id and whether it already existed.
    pub fn upsert_call(&self, normalized: &NormalizedCall) -> Result<(Uuid, bool), StorageError> {
        let conn = self.db.conn();

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM calls
                 WHERE (external_recording_id IS NOT NULL AND external_recording_id = ?1)
                    OR (share_url IS NOT NULL AND share_url = ?2)
                 LIMIT 1",
                params![normalized.external_recording_id, normalized.share_url],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            let id = Uuid::parse_str(&id).map_err(|_| StorageError::Corrupt {
                column: "id".into(),
                value: id,
            })?;
            return Ok((id, true));
        }

        let id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO calls (id, external_recording_id, title, start_time, end_time,
                                share_url, source_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id.to_string(),
                normalized.external_recording_id,
                normalized.title,
                normalized.start_time.map(encode_ts),
                normalized.end_time.map(encode_ts),
                normalized.share_url,
                normalized.source_url,
                encode_ts(Utc::now()),
            ],
        )?;
        Ok((id, false))
    }

    /// Replace the participant and utterance sets for a call. Utterance
    /// speaker ids are resolved against the provider's matched speaker
    /// label, then by exact name.
    pub fn replace_transcript(
        &self,
        call_id: Uuid,
        normalized: &NormalizedCall,
    ) -> Result<Vec<Participant>, StorageError> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM utterances WHERE call_id = ?1",
            params![call_id.to_string()],
        )?;
        tx.execute(
            "DELETE FROM participants WHERE call_id = ?1",
            params![call_id.to_string()],
        )?;

        let mut participants = Vec::with_capacity(normalized.participants.len());
        for p in &normalized.participants {
            let participant = Participant {
                id: Uuid::new_v4(),
                call_id,
                name: p.name.clone(),
                email: p.email.clone(),
                role: p.role,
                source_label: p.source_label.clone(),
            };
            tx.execute(
                "INSERT INTO participants (id, call_id, name, email, role, source_label)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    participant.id.to_string(),
                    call_id.to_string(),
                    participant.name,
                    participant.email,
                    participant.role.as_str(),
                    participant.source_label,
                ],
            )?;
            participants.push(participant);
        }

        for u in &normalized.utterances {
            let speaker_id = participants
                .iter()
                .find(|p| {
                    p.source_label.as_deref() == Some(u.speaker_label_raw.as_str())
                        || p.name == u.speaker_label_raw
                })
                .map(|p| p.id);

            tx.execute(
                "INSERT INTO utterances (call_id, idx, speaker_participant_id, speaker_label_raw,
                                         timestamp_start_sec, timestamp_end_sec, text_raw, text_normalized)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    call_id.to_string(),
                    u.idx,
                    speaker_id.map(|id| id.to_string()),
                    u.speaker_label_raw,
                    u.timestamp_start_sec,
                    u.timestamp_end_sec,
                    u.text_raw,
                    u.text_normalized,
                ],
            )?;
        }

        tx.commit()?;
        Ok(participants)
    }

    pub fn get_call(&self, call_id: Uuid) -> Result<Call, StorageError> {
        let conn = self.db.conn();
        conn.query_row(
            "SELECT id, external_recording_id, title, start_time, end_time, share_url,
                    source_url, created_at
             FROM calls WHERE id = ?1",
            params![call_id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                ))
            },
        )
        .optional()?
        .map(
            |(id, external_recording_id, title, start, end, share_url, source_url, created_at)| {
                Ok::<Call, StorageError>(Call {
                    id: Uuid::parse_str(&id).map_err(|_| StorageError::Corrupt {
                        column: "id".into(),
                        value: id,
                    })?,
                    external_recording_id,
                    title,
                    start_time: decode_opt_ts("start_time", start)?,
                    end_time: decode_opt_ts("end_time", end)?,
                    share_url,
                    source_url,
                    created_at: decode_ts("created_at", &created_at)?,
                })
            },
        )
        .transpose()?
        .ok_or_else(|| StorageError::NotFound(format!("call {call_id}")))
    }

    pub fn call_exists(&self, call_id: Uuid) -> Result<bool, StorageError> {
        let found: Option<i64> = self
            .db
            .conn()
            .query_row(
                "SELECT 1 FROM calls WHERE id = ?1",
                params![call_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn participants(&self, call_id: Uuid) -> Result<Vec<Participant>, StorageError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, email, role, source_label
             FROM participants WHERE call_id = ?1",
        )?;
        let rows = stmt.query_map(params![call_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut participants = Vec::new();
        for row in rows {
            let (id, name, email, role, source_label) = row?;
            participants.push(Participant {
                id: Uuid::parse_str(&id).map_err(|_| StorageError::Corrupt {
                    column: "id".into(),
                    value: id,
                })?,
                call_id,
                name,
                email,
                role: ParticipantRole::parse(&role),
                source_label,
            });
        }
        Ok(participants)
    }

    /// Utterances in transcript order.
    pub fn utterances(&self, call_id: Uuid) -> Result<Vec<Utterance>, StorageError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT idx, speaker_participant_id, speaker_label_raw, timestamp_start_sec,
                    timestamp_end_sec, text_raw, text_normalized
             FROM utterances WHERE call_id = ?1 ORDER BY idx ASC",
        )?;
        let rows = stmt.query_map(params![call_id.to_string()], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<u32>>(3)?,
                row.get::<_, Option<u32>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut utterances = Vec::new();
        for row in rows {
            let (idx, speaker_id, label, start, end, raw, normalized) = row?;
            let speaker_participant_id = speaker_id
                .map(|s| {
                    Uuid::parse_str(&s).map_err(|_| StorageError::Corrupt {
                        column: "speaker_participant_id".into(),
                        value: s,
                    })
                })
                .transpose()?;
            utterances.push(Utterance {
                call_id,
                idx,
                speaker_participant_id,
                speaker_label_raw: label,
                timestamp_start_sec: start,
                timestamp_end_sec: end,
                text_raw: raw,
                text_normalized: normalized,
            });
        }
        Ok(utterances)
    }

    /// Call ids with an external participant whose email is in `emails`
    /// (case-insensitive). Used by deal-to-call matching.
    pub fn call_ids_by_external_emails(
        &self,
        emails: &[String],
    ) -> Result<Vec<Uuid>, StorageError> {
        if emails.is_empty() {
            return Ok(Vec::new());
        }

        let lowered: Vec<String> = emails.iter().map(|e| e.to_lowercase()).collect();
        let placeholders = vec!["?"; lowered.len()].join(", ");
        let sql = format!(
            "SELECT DISTINCT call_id FROM participants
             WHERE role = 'external' AND email IS NOT NULL AND LOWER(email) IN ({placeholders})"
        );

        let conn = self.db.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(lowered.iter()),
            |row| row.get::<_, String>(0),
        )?;

        let mut ids = Vec::new();
        for row in rows {
            let id = row?;
            ids.push(Uuid::parse_str(&id).map_err(|_| StorageError::Corrupt {
                column: "call_id".into(),
                value: id,
            })?);
        }
        Ok(ids)
    }

    /// All (id, title) pairs, for company-name fallback matching.
    pub fn call_titles(&self) -> Result<Vec<(Uuid, String)>, StorageError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare("SELECT id, title FROM calls")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, title) = row?;
            out.push((
                Uuid::parse_str(&id).map_err(|_| StorageError::Corrupt {
                    column: "id".into(),
                    value: id,
                })?,
                title,
            ));
        }
        Ok(out)
    }
}
