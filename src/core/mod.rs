//! Orchestration logic: the per-call pipeline state machine, the
//! completion-backed Extract/Evaluate steps, the deterministic
//! cross-check, and the polling worker.

pub mod evaluator;
pub mod extractor;
pub mod orchestrator;
pub mod rules;
pub mod worker;

pub use evaluator::{evaluate_signals, EVALUATOR_PROMPT_VERSION};
pub use extractor::{extract_signals, EXTRACTOR_PROMPT_VERSION};
pub use orchestrator::Orchestrator;
pub use rules::{cross_check, CrossCheckOutcome, RUBRIC_VERSION};
pub use worker::Worker;
