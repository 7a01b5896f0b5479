//! Normalization of provider payloads into calls, participants, and
//! utterances.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::domain::{NormalizedCall, NormalizedParticipant, NormalizedUtterance, ParticipantRole};

use super::payload::RecorderMeeting;
use super::title::TeamDirectory;

/// Typographic characters mapped to their ASCII equivalents
const UNICODE_SUBSTITUTIONS: [(char, char); 6] = [
    ('\u{2018}', '\''), // left single quote
    ('\u{2019}', '\''), // right single quote
    ('\u{201C}', '"'),  // left double quote
    ('\u{201D}', '"'),  // right double quote
    ('\u{2013}', '-'),  // en dash
    ('\u{2014}', '-'),  // em dash
];

/// Trim, collapse whitespace runs, and map typographic quotes/dashes
/// to ASCII.
pub fn normalize_text(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .chars()
        .map(|c| {
            UNICODE_SUBSTITUTIONS
                .iter()
                .find(|(from, _)| *from == c)
                .map(|(_, to)| *to)
                .unwrap_or(c)
        })
        .collect()
}

/// "HH:MM:SS" → seconds from recording start
pub fn parse_timestamp_sec(ts: &str) -> Option<u32> {
    let parts: Vec<&str> = ts.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let h: u32 = parts[0].parse().ok()?;
    let m: u32 = parts[1].parse().ok()?;
    let s: u32 = parts[2].parse().ok()?;
    Some(h * 3600 + m * 60 + s)
}

fn parse_time(value: &Option<String>) -> Option<DateTime<Utc>> {
    value
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Map a provider meeting into the normalized shape.
///
/// Role classification: internal when the source marks the invitee
/// non-external or the name matches the account-team roster; external
/// otherwise. The recording operator is appended as an internal
/// participant when not already among the invitees.
pub fn map_meeting(meeting: &RecorderMeeting, directory: &TeamDirectory) -> NormalizedCall {
    let mut participants: Vec<NormalizedParticipant> = meeting
        .calendar_invitees
        .iter()
        .map(|inv| {
            let name = inv.name.clone().unwrap_or_else(|| "Unknown".to_string());
            let role = if !inv.is_external || directory.is_team_member(&name) {
                ParticipantRole::Internal
            } else {
                ParticipantRole::External
            };
            NormalizedParticipant {
                name,
                email: inv.email.clone(),
                role,
                source_label: inv.matched_speaker_display_name.clone(),
            }
        })
        .collect();

    if let Some(recorder) = &meeting.recorded_by {
        let already_included = participants
            .iter()
            .any(|p| p.email.as_deref() == Some(recorder.email.as_str()));
        if !already_included {
            participants.push(NormalizedParticipant {
                name: recorder.name.clone(),
                email: Some(recorder.email.clone()),
                role: ParticipantRole::Internal,
                source_label: recorder.team.clone(),
            });
        }
    }

    let utterances: Vec<NormalizedUtterance> = meeting
        .transcript
        .as_deref()
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(idx, entry)| NormalizedUtterance {
            idx: idx as u32,
            speaker_label_raw: entry.speaker.display_name.clone(),
            timestamp_start_sec: parse_timestamp_sec(&entry.timestamp),
            // The provider gives a single timestamp per entry
            timestamp_end_sec: None,
            text_raw: entry.text.clone(),
            text_normalized: normalize_text(&entry.text),
        })
        .collect();

    NormalizedCall {
        external_recording_id: Some(meeting.recording_id.to_string()),
        title: meeting.title.clone(),
        start_time: parse_time(&meeting.recording_start_time),
        end_time: parse_time(&meeting.recording_end_time),
        share_url: meeting.share_url.clone(),
        source_url: meeting.url.clone(),
        participants,
        utterances,
    }
}

/// Content fingerprint of an utterance set, used to detect stale
/// reprocessing. Covers ordering and normalized text.
pub fn transcript_hash<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = (u32, &'a str)>,
{
    let mut hasher = Sha256::new();
    for (idx, text) in parts {
        hasher.update(idx.to_le_bytes());
        hasher.update(text.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}
