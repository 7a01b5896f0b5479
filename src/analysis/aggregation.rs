//! Weekly phrase aggregation.
//!
//! Pure functions: group a week's extractions by (category, normalized
//! phrase), then merge against the prior run's cumulative baseline. The
//! cumulative invariant is `cumulative(N) = cumulative(N-1) + week(N)`,
//! with `first_seen_at` carried forward unchanged from the run a phrase
//! first appeared in.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, Local, TimeZone, Utc};
use uuid::Uuid;

use crate::domain::{
    normalize_phrase_key, PhraseCategory, PhraseContext, PhraseExtraction, PhraseStatistic,
    PHRASE_CATEGORIES,
};

/// Contexts retained per statistic row
const MAX_EXAMPLE_CONTEXTS: usize = 5;

/// One week's totals for a (category, normalized phrase) group
#[derive(Debug, Clone)]
pub struct WeekAggregate {
    pub phrase: String,
    pub category: PhraseCategory,
    pub frequency: u32,
    pub call_ids: std::collections::HashSet<Uuid>,
    pub contexts: Vec<PhraseContext>,
}

/// Prior cumulative counters for a group
#[derive(Debug, Clone)]
pub struct BaselineStat {
    pub cumulative_frequency: u32,
    pub cumulative_call_count: u32,
    pub first_seen_at: DateTime<Utc>,
}

/// Monday 00:00 of the current ISO week, in the host's local timezone.
pub fn current_week_start(now: DateTime<Local>) -> DateTime<Utc> {
    let days_from_monday = now.weekday().num_days_from_monday() as i64;
    let monday = now.date_naive() - Duration::days(days_from_monday);
    let midnight = monday.and_hms_opt(0, 0, 0).expect("valid midnight");
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

/// Group a week's extractions by (category, normalized phrase).
pub fn aggregate_week(
    extractions: &[(Uuid, PhraseExtraction)],
) -> HashMap<(PhraseCategory, String), WeekAggregate> {
    let mut agg: HashMap<(PhraseCategory, String), WeekAggregate> = HashMap::new();

    for (call_id, extraction) in extractions {
        for category in PHRASE_CATEGORIES {
            for item in extraction.category(category) {
                let key = (category, normalize_phrase_key(&item.phrase));
                let entry = agg.entry(key).or_insert_with(|| WeekAggregate {
                    phrase: item.phrase.clone(),
                    category,
                    frequency: 0,
                    call_ids: Default::default(),
                    contexts: Vec::new(),
                });

                entry.frequency += 1;
                entry.call_ids.insert(*call_id);
                if entry.contexts.len() < MAX_EXAMPLE_CONTEXTS {
                    entry.contexts.push(PhraseContext {
                        quote: item.verbatim_quote.clone(),
                        speaker: item.speaker.clone(),
                        context: item.context_summary.clone(),
                    });
                }
            }
        }
    }

    agg
}

/// Merge the week's groups with the prior cumulative baseline into the
/// rows to persist for `run_id`.
pub fn merge_with_baseline(
    run_id: Uuid,
    week: HashMap<(PhraseCategory, String), WeekAggregate>,
    baseline: &HashMap<(PhraseCategory, String), BaselineStat>,
    now: DateTime<Utc>,
) -> Vec<PhraseStatistic> {
    let mut rows: Vec<PhraseStatistic> = week
        .into_iter()
        .map(|(key, agg)| {
            let prior = baseline.get(&key);
            PhraseStatistic {
                run_id,
                phrase: agg.phrase,
                category: agg.category,
                frequency: agg.frequency,
                call_count: agg.call_ids.len() as u32,
                cumulative_frequency: prior.map(|p| p.cumulative_frequency).unwrap_or(0)
                    + agg.frequency,
                cumulative_call_count: prior.map(|p| p.cumulative_call_count).unwrap_or(0)
                    + agg.call_ids.len() as u32,
                example_contexts: agg.contexts,
                first_seen_at: prior.map(|p| p.first_seen_at).unwrap_or(now),
                last_seen_at: now,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.cumulative_frequency
            .cmp(&a.cumulative_frequency)
            .then_with(|| a.phrase.cmp(&b.phrase))
    });
    rows
}
