//! Phrase extraction output and cumulative statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The five fixed phrase categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhraseCategory {
    ProblemDescriptions,
    SolutionSeeking,
    PainLanguage,
    FeatureMentions,
    SearchIntent,
}

pub const PHRASE_CATEGORIES: [PhraseCategory; 5] = [
    PhraseCategory::ProblemDescriptions,
    PhraseCategory::SolutionSeeking,
    PhraseCategory::PainLanguage,
    PhraseCategory::FeatureMentions,
    PhraseCategory::SearchIntent,
];

impl PhraseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProblemDescriptions => "problem_descriptions",
            Self::SolutionSeeking => "solution_seeking",
            Self::PainLanguage => "pain_language",
            Self::FeatureMentions => "feature_mentions",
            Self::SearchIntent => "search_intent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "problem_descriptions" => Some(Self::ProblemDescriptions),
            "solution_seeking" => Some(Self::SolutionSeeking),
            "pain_language" => Some(Self::PainLanguage),
            "feature_mentions" => Some(Self::FeatureMentions),
            "search_intent" => Some(Self::SearchIntent),
            _ => None,
        }
    }
}

/// One phrase pulled out of a counterpart utterance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedPhrase {
    pub phrase: String,
    pub verbatim_quote: String,
    pub speaker: String,
    pub context_summary: String,
}

/// Categorized phrases for one call; may be empty in every category
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhraseExtraction {
    pub problem_descriptions: Vec<ExtractedPhrase>,
    pub solution_seeking: Vec<ExtractedPhrase>,
    pub pain_language: Vec<ExtractedPhrase>,
    pub feature_mentions: Vec<ExtractedPhrase>,
    pub search_intent: Vec<ExtractedPhrase>,
}

impl PhraseExtraction {
    pub fn category(&self, category: PhraseCategory) -> &[ExtractedPhrase] {
        match category {
            PhraseCategory::ProblemDescriptions => &self.problem_descriptions,
            PhraseCategory::SolutionSeeking => &self.solution_seeking,
            PhraseCategory::PainLanguage => &self.pain_language,
            PhraseCategory::FeatureMentions => &self.feature_mentions,
            PhraseCategory::SearchIntent => &self.search_intent,
        }
    }

    pub fn total_phrases(&self) -> usize {
        PHRASE_CATEGORIES
            .iter()
            .map(|c| self.category(*c).len())
            .sum()
    }
}

/// Surrounding detail kept alongside a phrase statistic (at most 5 per row)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhraseContext {
    pub quote: String,
    pub speaker: String,
    pub context: String,
}

/// One row per (run, category, normalized phrase) with cumulative counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhraseStatistic {
    pub run_id: Uuid,
    pub phrase: String,
    pub category: PhraseCategory,

    /// Occurrences this week
    pub frequency: u32,

    /// Distinct calls this week
    pub call_count: u32,

    /// Running totals across all weekly runs
    pub cumulative_frequency: u32,
    pub cumulative_call_count: u32,

    pub example_contexts: Vec<PhraseContext>,

    /// Carried forward unchanged from the first run the phrase appeared in
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Lowercase, trim, and collapse internal whitespace; the grouping key
/// for cumulative aggregation.
pub fn normalize_phrase_key(phrase: &str) -> String {
    phrase
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phrase_key() {
        assert_eq!(
            normalize_phrase_key("  Integration   Issues "),
            "integration issues"
        );
        assert_eq!(normalize_phrase_key("SSO setup"), "sso setup");
    }

    #[test]
    fn test_category_round_trip() {
        for c in PHRASE_CATEGORIES {
            assert_eq!(PhraseCategory::parse(c.as_str()), Some(c));
        }
        assert_eq!(PhraseCategory::parse("misc"), None);
    }

    #[test]
    fn test_empty_extraction_counts_zero() {
        assert_eq!(PhraseExtraction::default().total_phrases(), 0);
    }
}
