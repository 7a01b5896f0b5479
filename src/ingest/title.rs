//! Meeting-title parsing and meeting-context derivation.
//!
//! Sales calls are titled in a handful of house styles, all of which pair
//! the operator's company with the counterpart around a separator:
//! `"Console/Lattice (Legal)"`, `"(Clio/Console) - Connection Call"`,
//! `"Console // Goat HR focused demo"`. The parser is deterministic and
//! pure; the operator company and account-team roster are injected
//! configuration, never module constants.

use serde::{Deserialize, Serialize};

use crate::domain::{DealSegment, NormalizedParticipant, ParticipantRole};

/// Separators tried longest-first so "//" is not split as "/"
const SEPARATORS: [&str; 4] = ["//", "<>", " x ", "/"];

/// Role/function words that may trail a counterpart name in parentheses
const ROLE_DESCRIPTORS: [&str; 13] = [
    "legal",
    "hr",
    "it",
    "security",
    "finance",
    "engineering",
    "sales",
    "marketing",
    "ops",
    "procurement",
    "compliance",
    "recruiting",
    "people",
];

/// Free-text words stripped from the end of a counterpart token
const TRAILING_DESCRIPTORS: [&str; 16] = [
    "demo",
    "sync",
    "kickoff",
    "intro",
    "call",
    "meeting",
    "chat",
    "focused",
    "followup",
    "follow-up",
    "overview",
    "discussion",
    "connect",
    "connection",
    "catchup",
    "debrief",
];

/// Injected operator identity: company name plus the account-team roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamDirectory {
    company: String,
    roster: Vec<String>,
}

impl TeamDirectory {
    pub fn new(company: impl Into<String>, roster: Vec<String>) -> Self {
        Self {
            company: company.into(),
            roster,
        }
    }

    pub fn company(&self) -> &str {
        &self.company
    }

    /// A name counts as a team member when it contains a roster entry,
    /// case-insensitively.
    pub fn is_team_member(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.roster
            .iter()
            .any(|member| lower.contains(&member.to_lowercase()))
    }

    /// First of the given names that matches the roster.
    pub fn find_team_member<'a, I>(&self, names: I) -> Option<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .find(|n| self.is_team_member(n))
            .map(String::from)
    }
}

/// Derive the counterpart company name from a meeting title.
///
/// Returns None when the title carries no recognized separator.
pub fn parse_meeting_title(title: &str, our_company: &str) -> Option<String> {
    let trimmed = title.trim();

    // Titles of the form "(A/B) - suffix" carry the pairing inside the
    // wrapper; the suffix is free text.
    let working = strip_enclosing_parens(trimmed).unwrap_or(trimmed);

    let separator = SEPARATORS.iter().find(|sep| working.contains(*sep))?;

    let token = working
        .split(separator)
        .map(str::trim)
        .find(|tok| !tok.is_empty() && !tok.eq_ignore_ascii_case(our_company))?;

    // "Lattice (Legal)" → "Lattice"; "Acme (Jane)" → "Jane"
    if let Some((name, inner)) = split_paren_suffix(token) {
        if ROLE_DESCRIPTORS.contains(&inner.to_lowercase().as_str()) {
            return non_empty(name);
        }
        if !inner.is_empty() && !inner.eq_ignore_ascii_case(our_company) {
            return non_empty(inner);
        }
    }

    non_empty(&clean_token(token))
}

/// "(inner) trailing" → inner, when the title opens with a parenthesis
fn strip_enclosing_parens(title: &str) -> Option<&str> {
    let rest = title.strip_prefix('(')?;
    let close = rest.find(')')?;
    Some(rest[..close].trim())
}

/// "Name (Inner)" → (Name, Inner) when the token ends in a paren group
fn split_paren_suffix(token: &str) -> Option<(&str, &str)> {
    let stripped = token.strip_suffix(')')?;
    let open = stripped.rfind('(')?;
    Some((stripped[..open].trim(), stripped[open + 1..].trim()))
}

/// Drop a dash-separated suffix, a leftover paren group, and trailing
/// descriptor words.
fn clean_token(token: &str) -> String {
    let mut text = token.split(" - ").next().unwrap_or(token).trim();
    if let Some((name, _)) = split_paren_suffix(text) {
        text = name;
    }

    let mut words: Vec<&str> = text.split_whitespace().collect();
    while let Some(last) = words.last() {
        if TRAILING_DESCRIPTORS.contains(&last.to_lowercase().as_str()) {
            words.pop();
        } else {
            break;
        }
    }
    words.join(" ")
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// "Fannie Mae" → "fanniemae.com"
pub fn guess_company_domain(company: &str) -> String {
    let cleaned: String = company
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    format!("{cleaned}.com")
}

/// Everything the Extract and Evaluate prompts need to know about the
/// meeting beyond the transcript itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingContext {
    pub our_company: String,
    pub prospect_company: Option<String>,
    pub deal_segment: DealSegment,
    pub meeting_title: String,
    pub internal_attendees: Vec<String>,
    pub external_attendees: Vec<String>,

    /// Roster member who owns the account, when one attended
    pub account_owner: Option<String>,
}

impl MeetingContext {
    /// Build context from the title and participant roster. The segment
    /// starts at its default and is refined by the Enrich step.
    pub fn build(
        title: &str,
        participants: &[NormalizedParticipant],
        directory: &TeamDirectory,
    ) -> Self {
        let prospect_company = parse_meeting_title(title, directory.company());

        let internal_attendees: Vec<String> = participants
            .iter()
            .filter(|p| p.role == ParticipantRole::Internal)
            .map(|p| p.name.clone())
            .collect();
        let external_attendees: Vec<String> = participants
            .iter()
            .filter(|p| p.role == ParticipantRole::External)
            .map(|p| p.name.clone())
            .collect();

        let account_owner =
            directory.find_team_member(participants.iter().map(|p| p.name.as_str()));

        Self {
            our_company: directory.company().to_string(),
            prospect_company,
            deal_segment: DealSegment::default(),
            meeting_title: title.to_string(),
            internal_attendees,
            external_attendees,
            account_owner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OURS: &str = "Console";

    #[test]
    fn test_slash_with_role_descriptor() {
        assert_eq!(
            parse_meeting_title("Console/Lattice (Legal)", OURS),
            Some("Lattice".to_string())
        );
    }

    #[test]
    fn test_wrapped_pairing_with_suffix() {
        assert_eq!(
            parse_meeting_title("(Clio/Console) - Connection Call", OURS),
            Some("Clio".to_string())
        );
    }

    #[test]
    fn test_double_slash_with_trailing_descriptors() {
        assert_eq!(
            parse_meeting_title("Console // Goat HR focused demo", OURS),
            Some("Goat HR".to_string())
        );
    }

    #[test]
    fn test_no_separator_returns_none() {
        assert_eq!(parse_meeting_title("Quarterly planning", OURS), None);
    }

    #[test]
    fn test_x_separator() {
        assert_eq!(
            parse_meeting_title("Acme x Console", OURS),
            Some("Acme".to_string())
        );
    }

    #[test]
    fn test_angle_separator() {
        assert_eq!(
            parse_meeting_title("Console<>Northwind sync", OURS),
            Some("Northwind".to_string())
        );
    }

    #[test]
    fn test_dash_suffix_stripped() {
        assert_eq!(
            parse_meeting_title("Console/Acme - intro call", OURS),
            Some("Acme".to_string())
        );
    }

    #[test]
    fn test_non_role_paren_inner_returned() {
        assert_eq!(
            parse_meeting_title("Console/Initech (Globex)", OURS),
            Some("Globex".to_string())
        );
    }

    #[test]
    fn test_operator_paren_inner_falls_back_to_name() {
        assert_eq!(
            parse_meeting_title("Lattice (Console)/Console", OURS),
            Some("Lattice".to_string())
        );
    }

    #[test]
    fn test_guess_company_domain() {
        assert_eq!(guess_company_domain("Fannie Mae"), "fanniemae.com");
        assert_eq!(guess_company_domain("Goat HR"), "goathr.com");
    }

    #[test]
    fn test_directory_roster_matching() {
        let dir = TeamDirectory::new(OURS, vec!["Dana Reyes".into()]);
        assert!(dir.is_team_member("Dana Reyes (Console)"));
        assert!(!dir.is_team_member("Priya Shah"));
        assert_eq!(
            dir.find_team_member(["Priya Shah", "Dana Reyes"]),
            Some("Dana Reyes".to_string())
        );
    }

    #[test]
    fn test_context_build_splits_attendees() {
        use crate::domain::{NormalizedParticipant, ParticipantRole};

        let dir = TeamDirectory::new(OURS, vec!["Dana".into()]);
        let participants = vec![
            NormalizedParticipant {
                name: "Priya Shah".into(),
                email: Some("priya@acme.com".into()),
                role: ParticipantRole::External,
                source_label: None,
            },
            NormalizedParticipant {
                name: "Dana Reyes".into(),
                email: None,
                role: ParticipantRole::Internal,
                source_label: None,
            },
        ];

        let ctx = MeetingContext::build("Console/Acme", &participants, &dir);
        assert_eq!(ctx.prospect_company.as_deref(), Some("Acme"));
        assert_eq!(ctx.internal_attendees, vec!["Dana Reyes"]);
        assert_eq!(ctx.external_attendees, vec!["Priya Shah"]);
        assert_eq!(ctx.account_owner.as_deref(), Some("Dana Reyes"));
        assert_eq!(ctx.deal_segment, DealSegment::MidTier);
    }
}
