//! Meeting payload as delivered by the recording provider.
//!
//! Field names follow the provider's meeting schema; everything the
//! pipeline does not need is tolerated and ignored via serde defaults.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSpeaker {
    pub display_name: String,
    #[serde(default)]
    pub matched_calendar_invitee_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptItem {
    pub speaker: TranscriptSpeaker,
    pub text: String,

    /// "HH:MM:SS" relative to recording start
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitee {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_external: bool,
    #[serde(default)]
    pub matched_speaker_display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedBy {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub team: Option<String>,
}

/// A recorded meeting with transcript, as the provider serializes it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderMeeting {
    pub title: String,
    pub recording_id: u64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub share_url: Option<String>,
    #[serde(default)]
    pub recording_start_time: Option<String>,
    #[serde(default)]
    pub recording_end_time: Option<String>,
    #[serde(default)]
    pub calendar_invitees: Vec<Invitee>,
    #[serde(default)]
    pub recorded_by: Option<RecordedBy>,
    #[serde(default)]
    pub transcript: Option<Vec<TranscriptItem>>,
}

impl RecorderMeeting {
    /// Cheap structural check before full deserialization is attempted.
    pub fn looks_like_meeting(body: &serde_json::Value) -> bool {
        body.get("title").map_or(false, |v| v.is_string())
            && body.get("recording_id").map_or(false, |v| v.is_u64())
    }
}
