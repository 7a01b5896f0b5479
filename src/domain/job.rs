//! Durable job rows and the payload contracts for each job type.
//!
//! Jobs are the only contended resource in the system. Mutation is
//! restricted to the queue operations in `storage::queue` (claim,
//! mark_succeeded, mark_failed).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A row in the durable work queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job
    pub id: Uuid,

    /// What kind of work this job carries
    pub job_type: JobType,

    /// Current queue status
    pub status: JobStatus,

    /// Type-specific payload (see the job payload contracts)
    pub payload: serde_json::Value,

    /// Number of failed attempts so far
    pub attempts: u32,

    /// Earliest time the job is eligible for claiming
    pub run_after: DateTime<Utc>,

    /// Worker identity holding the lease (if running)
    pub locked_by: Option<String>,

    /// When the lease was taken (if running)
    pub locked_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Supported job types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    /// Process a raw admitted meeting payload end to end
    ProcessMeeting,

    /// Re-run Enrich onward for an already-normalized call
    ReprocessCall,

    /// Run a phrase-extraction pass over CRM-matched calls
    ExtractPhrases,

    /// Merge this week's phrase extractions into cumulative statistics
    RunWeeklyAnalysis,
}

impl JobType {
    /// Stable string form used in the jobs table
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessMeeting => "PROCESS_MEETING",
            Self::ReprocessCall => "REPROCESS_CALL",
            Self::ExtractPhrases => "EXTRACT_PHRASES",
            Self::RunWeeklyAnalysis => "RUN_WEEKLY_ANALYSIS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PROCESS_MEETING" => Some(Self::ProcessMeeting),
            "REPROCESS_CALL" => Some(Self::ReprocessCall),
            "EXTRACT_PHRASES" => Some(Self::ExtractPhrases),
            "RUN_WEEKLY_ANALYSIS" => Some(Self::RunWeeklyAnalysis),
            _ => None,
        }
    }
}

/// Queue status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed (or re-queued for retry)
    Queued,

    /// Claimed by a worker, lease held
    Running,

    /// Terminal: completed successfully
    Succeeded,

    /// Terminal: retry budget exhausted, requires manual re-enqueue
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Dead)
    }
}

/// Payload for `ProcessMeeting`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessMeetingPayload {
    pub webhook_event_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

/// Payload for `ReprocessCall`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReprocessCallPayload {
    pub call_id: Uuid,
}

/// Payload for `ExtractPhrases`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractPhrasesPayload {
    pub crm_pipeline_id: String,
    pub crm_stage_id: String,
    #[serde(default)]
    pub backfill: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_round_trip() {
        for jt in [
            JobType::ProcessMeeting,
            JobType::ReprocessCall,
            JobType::ExtractPhrases,
            JobType::RunWeeklyAnalysis,
        ] {
            assert_eq!(JobType::parse(jt.as_str()), Some(jt));
        }
        assert_eq!(JobType::parse("UNKNOWN_TYPE"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Dead.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_process_meeting_payload_omits_absent_callback() {
        let payload = ProcessMeetingPayload {
            webhook_event_id: Uuid::new_v4(),
            callback_url: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("callback_url").is_none());
    }
}
