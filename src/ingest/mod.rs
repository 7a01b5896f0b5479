//! Inbound meeting intake: webhook verification, provider payload
//! parsing, normalization, and meeting-context derivation.

pub mod normalize;
pub mod payload;
pub mod title;
pub mod verify;

pub use normalize::{map_meeting, normalize_text, transcript_hash};
pub use payload::RecorderMeeting;
pub use title::{parse_meeting_title, MeetingContext, TeamDirectory};
pub use verify::{parse_webhook_headers, verify_signature, WebhookHeaders};
