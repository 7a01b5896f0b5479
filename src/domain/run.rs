//! Processing-run and analysis-run bookkeeping.
//!
//! A ProcessingRun records one attempt at pushing a call through the
//! pipeline; prior runs are retained for history, never overwritten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One attempt at processing a call through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRun {
    pub id: Uuid,
    pub call_id: Uuid,
    pub status: RunStatus,

    /// Versions pinned at run start, for audit
    pub rubric_version: String,
    pub extractor_prompt_version: String,
    pub evaluator_prompt_version: String,

    /// Content fingerprint of the utterance set this run saw
    pub transcript_hash: String,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A phrase-analysis run (extraction pass or weekly aggregation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoAnalysisRun {
    pub id: Uuid,
    pub run_type: GeoRunType,
    pub status: GeoRunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub calls_processed: u32,
    pub error: Option<String>,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoRunType {
    DailyExtraction,
    WeeklyAnalysis,
    Backfill,
}

impl GeoRunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DailyExtraction => "daily_extraction",
            Self::WeeklyAnalysis => "weekly_analysis",
            Self::Backfill => "backfill",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily_extraction" => Some(Self::DailyExtraction),
            "weekly_analysis" => Some(Self::WeeklyAnalysis),
            "backfill" => Some(Self::Backfill),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoRunStatus {
    Running,
    Succeeded,
    Failed,
}

impl GeoRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
