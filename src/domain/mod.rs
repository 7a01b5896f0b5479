//! Domain types for the salient pipeline.
//!
//! This module contains the core data structures:
//! - Job: durable queue rows and payload contracts
//! - Call: normalized meetings, participants, utterances
//! - ProcessingRun / GeoAnalysisRun: per-attempt bookkeeping
//! - ExtractedSignals / Evaluation: structured analysis outputs
//! - Phrases: phrase extractions and cumulative statistics

pub mod call;
pub mod evaluation;
pub mod job;
pub mod phrases;
pub mod run;
pub mod signals;

// Re-export commonly used types
pub use call::{
    Call, NormalizedCall, NormalizedParticipant, NormalizedUtterance, Participant,
    ParticipantRole, Utterance,
};
pub use evaluation::{BantScores, DimensionScore, Evaluation, OverallStatus};
pub use job::{Job, JobStatus, JobType};
pub use phrases::{
    normalize_phrase_key, ExtractedPhrase, PhraseCategory, PhraseContext, PhraseExtraction,
    PhraseStatistic, PHRASE_CATEGORIES,
};
pub use run::{GeoAnalysisRun, GeoRunStatus, GeoRunType, ProcessingRun, RunStatus};
pub use signals::{
    DealSegment, ExtractedSignals, ProspectSentiment, SignalField, SignalValue, ValidationError,
};
