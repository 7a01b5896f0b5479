//! Phrase analytics: per-call extraction passes over the counterpart's
//! utterances, and the weekly aggregation that merges fresh counts into
//! cumulative statistics.

pub mod aggregation;
pub mod extraction;

pub use aggregation::{aggregate_week, current_week_start, merge_with_baseline, WeekAggregate};
pub use extraction::{match_deals_to_calls, PhraseAnalyzer, PHRASE_PROMPT_VERSION};
