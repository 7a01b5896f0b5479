//! salient - sales-call evaluation and phrase-analytics pipeline
//!
//! Ingests recorded sales-call events from a meeting-recording provider,
//! runs each call through a multi-stage analysis pipeline, and
//! separately aggregates recurring counterpart phrases into cumulative
//! trend statistics.
//!
//! # Architecture
//!
//! - Inbound webhooks are verified, admitted idempotently, and turned
//!   into durable jobs
//! - Workers poll the job queue; the atomic claim is the only
//!   inter-worker coordination
//! - A per-call state machine runs Normalize → Enrich → Extract →
//!   Evaluate → CrossCheck → Persist, one ProcessingRun per attempt
//! - The phrase analyzer extracts counterpart phrases per call and
//!   merges weekly counts into cumulative statistics
//!
//! # Modules
//!
//! - `adapters`: External collaborators (completion API, recorder, CRM,
//!   enrichment, callbacks)
//! - `analysis`: Phrase extraction passes and weekly aggregation
//! - `core`: Orchestration logic (Orchestrator, Worker, rules)
//! - `domain`: Data structures (Job, Call, signals, evaluations)
//! - `ingest`: Webhook verification, payload normalization, title
//!   parsing
//! - `server`: HTTP surface (webhook intake, admin/geo routes)
//! - `storage`: SQLite persistence (event store, job queue,
//!   repositories)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Start the HTTP server
//! salient serve
//!
//! # Start a polling worker
//! salient worker
//!
//! # Drain up to five queued jobs, then exit
//! salient run-once --max-jobs 5
//! ```

pub mod adapters;
pub mod analysis;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;
pub mod server;
pub mod storage;

// Re-export main types at crate root for convenience
pub use crate::analysis::PhraseAnalyzer;
pub use crate::core::{Orchestrator, Worker};
pub use crate::domain::{Call, Evaluation, ExtractedSignals, Job, JobStatus, JobType};
pub use crate::ingest::{MeetingContext, TeamDirectory};
pub use crate::storage::{Database, EventStore, JobQueue};
