//! Calls, participants, and utterances.
//!
//! The `Normalized*` types are the provider-agnostic output of the
//! Normalize step; the bare types mirror persisted rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted call (one per distinct recording)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub id: Uuid,

    /// Provider recording id; dedup key together with share_url
    pub external_recording_id: Option<String>,

    pub title: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub share_url: Option<String>,

    /// Provider-internal URL, kept for manual lookup
    pub source_url: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Which side of the table a participant sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    /// Account-team side (roster match or non-external per the source)
    Internal,

    /// Counterpart side
    External,

    Unknown,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "internal" => Self::Internal,
            "external" => Self::External,
            _ => Self::Unknown,
        }
    }
}

/// A persisted participant row; replaced wholesale per normalization pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub call_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub role: ParticipantRole,

    /// Raw label the provider attached (matched speaker name, team, ...)
    pub source_label: Option<String>,
}

/// A persisted transcript line; idx is contiguous from 0 per call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    pub call_id: Uuid,
    pub idx: u32,
    pub speaker_participant_id: Option<Uuid>,
    pub speaker_label_raw: String,
    pub timestamp_start_sec: Option<u32>,
    pub timestamp_end_sec: Option<u32>,
    pub text_raw: String,
    pub text_normalized: String,
}

/// Output of mapping a provider payload, before any row ids exist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedCall {
    pub external_recording_id: Option<String>,
    pub title: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub share_url: Option<String>,
    pub source_url: Option<String>,
    pub participants: Vec<NormalizedParticipant>,
    pub utterances: Vec<NormalizedUtterance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedParticipant {
    pub name: String,
    pub email: Option<String>,
    pub role: ParticipantRole,
    pub source_label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedUtterance {
    pub idx: u32,
    pub speaker_label_raw: String,
    pub timestamp_start_sec: Option<u32>,
    pub timestamp_end_sec: Option<u32>,
    pub text_raw: String,
    pub text_normalized: String,
}
