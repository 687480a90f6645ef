//! Comparison keys derived from a fixture's date and summary text.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use fxcal_core::Fixture;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Club-form filler that never identifies an opponent on its own.
pub const DEFAULT_IGNORED_TOKENS: &[&str] = &["fc", "ac", "ssc", "sc", "cf", "afc", "calcio", "vs", "v"];

/// Tried in order; the first one occurring exactly once wins.
const SIDE_SEPARATORS: &[&str] = &[" vs. ", " vs ", " v ", " - ", "-"];

const DASH_VARIANTS: &[char] = &[
    '\u{2010}', '\u{2011}', '\u{2012}', '\u{2013}', '\u{2014}', '\u{2015}', '\u{2212}', '\u{FE58}',
    '\u{FE63}', '\u{FF0D}',
];

static RE_ENCLOSED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureOptions {
    pub ignored_tokens: Vec<String>,
}

impl Default for SignatureOptions {
    fn default() -> Self {
        Self {
            ignored_tokens: DEFAULT_IGNORED_TOKENS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signature {
    pub date_key: Option<NaiveDate>,
    pub team_tokens: BTreeSet<String>,
    /// Set only when no separator split the summary into two sides.
    pub exact_key: Option<String>,
    pub instant: Option<DateTime<Utc>>,
}

impl Signature {
    /// True when the team tokens came from a clean two-sided split.
    pub fn is_structured(&self) -> bool {
        self.exact_key.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct SignatureBuilder {
    subject_tokens: HashSet<String>,
    ignored_tokens: HashSet<String>,
}

impl SignatureBuilder {
    pub fn new(subject_keyword: &str, options: &SignatureOptions) -> Self {
        Self {
            subject_tokens: normalize_summary(subject_keyword)
                .split(' ')
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            ignored_tokens: options
                .ignored_tokens
                .iter()
                .map(|t| normalize_summary(t))
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn build(&self, fixture: &Fixture) -> Signature {
        let date_key = fixture.start.as_ref().map(|s| s.date_utc());
        let instant = fixture.start.as_ref().and_then(|s| s.instant());

        if let Some((home, away)) = split_sides(&fixture.summary) {
            let mut team_tokens = self.team_tokens(&home);
            team_tokens.extend(self.team_tokens(&away));
            return Signature {
                date_key,
                team_tokens,
                exact_key: None,
                instant,
            };
        }

        let normalized = normalize_summary(&fixture.summary);
        Signature {
            date_key,
            team_tokens: self.team_tokens(&normalized),
            exact_key: Some(normalized),
            instant,
        }
    }

    fn team_tokens(&self, normalized: &str) -> BTreeSet<String> {
        normalized
            .split(' ')
            .filter(|t| t.chars().count() >= 2)
            .filter(|t| !self.subject_tokens.contains(*t) && !self.ignored_tokens.contains(*t))
            .map(str::to_string)
            .collect()
    }
}

/// Lowercase, drop bracketed scores/tags and digits, keep letters only, collapse spaces.
pub fn normalize_summary(input: &str) -> String {
    let folded = canonical_dashes(&input.to_lowercase());
    let without_enclosed = RE_ENCLOSED.replace_all(&folded, " ");
    without_enclosed
        .chars()
        .map(|c| if c.is_alphabetic() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits a summary into its two sides, each already normalized.
pub fn split_sides(summary: &str) -> Option<(String, String)> {
    let canonical = canonical_dashes(summary);
    // ASCII folding keeps byte offsets aligned with `canonical`.
    let folded = canonical.to_ascii_lowercase();

    for separator in SIDE_SEPARATORS {
        let hits: Vec<usize> = folded.match_indices(separator).map(|(i, _)| i).collect();
        if hits.len() != 1 {
            continue;
        }
        let at = hits[0];
        let home = normalize_summary(&canonical[..at]);
        let away = normalize_summary(&canonical[at + separator.len()..]);
        if !home.is_empty() && !away.is_empty() {
            return Some((home, away));
        }
    }
    None
}

fn canonical_dashes(input: &str) -> String {
    input
        .chars()
        .map(|c| if DASH_VARIANTS.contains(&c) { '-' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fxcal_core::{FeedRole, FixtureStart};

    fn builder() -> SignatureBuilder {
        SignatureBuilder::new("Napoli", &SignatureOptions::default())
    }

    fn tokens(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalize_strips_scores_tags_digits_and_punctuation() {
        assert_eq!(
            normalize_summary("Napoli vs Cagliari [COP] (1-1)"),
            "napoli vs cagliari"
        );
        assert_eq!(normalize_summary("  Hellas   Verona – Napoli 2"), "hellas verona napoli");
        assert_eq!(normalize_summary("Atlético Madrid — Napoli"), "atlético madrid napoli");
        assert_eq!(normalize_summary("Napoli, Round 3!"), "napoli round");
    }

    #[test]
    fn split_prefers_vs_before_dashes() {
        assert_eq!(
            split_sides("Napoli vs Cagliari [COP] (1-1)"),
            Some(("napoli".into(), "cagliari".into()))
        );
        assert_eq!(
            split_sides("Napoli - Inter (2-0)"),
            Some(("napoli".into(), "inter".into()))
        );
        assert_eq!(
            split_sides("Inter V Napoli"),
            Some(("inter".into(), "napoli".into()))
        );
        assert_eq!(
            split_sides("Napoli–Lazio"),
            Some(("napoli".into(), "lazio".into()))
        );
    }

    #[test]
    fn split_rejects_ambiguous_or_one_sided_summaries() {
        assert_eq!(split_sides("Napoli training session"), None);
        assert_eq!(split_sides("Napoli-Inter-Milan"), None);
        assert_eq!(split_sides("Napoli - (1-1)"), None);
    }

    #[test]
    fn build_removes_subject_and_filler_tokens() {
        let fixture = Fixture::new(FeedRole::Primary, "Napoli - Modena FC [COP]", None);
        let signature = builder().build(&fixture);
        assert_eq!(signature.team_tokens, tokens(&["modena"]));
        assert!(signature.is_structured());
        assert_eq!(signature.date_key, None);
    }

    #[test]
    fn build_uses_utc_date() {
        let at = chrono::FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 9, 11, 1, 0, 0)
            .single()
            .unwrap();
        let fixture = Fixture::new(FeedRole::Secondary, "Inter v Napoli", Some(FixtureStart::zoned(at)));
        let signature = builder().build(&fixture);
        assert_eq!(signature.date_key, NaiveDate::from_ymd_opt(2025, 9, 10));
        assert_eq!(signature.instant, Some(at.with_timezone(&Utc)));
        assert_eq!(signature.team_tokens, tokens(&["inter"]));
    }

    #[test]
    fn unsplittable_summary_falls_back_to_exact_key() {
        let fixture = Fixture::new(FeedRole::Primary, "Napoli at Juventus Stadium", None);
        let signature = builder().build(&fixture);
        assert!(!signature.is_structured());
        assert_eq!(signature.exact_key.as_deref(), Some("napoli at juventus stadium"));
        assert_eq!(signature.team_tokens, tokens(&["at", "juventus", "stadium"]));
    }

    #[test]
    fn multi_word_subject_is_removed_entirely() {
        let builder = SignatureBuilder::new("SSC Napoli", &SignatureOptions { ignored_tokens: vec![] });
        let fixture = Fixture::new(FeedRole::Primary, "SSC Napoli v AS Roma", None);
        assert_eq!(builder.build(&fixture).team_tokens, tokens(&["as", "roma"]));
    }

    #[test]
    fn build_is_deterministic() {
        let fixture = Fixture::new(FeedRole::Primary, "Napoli vs Cagliari [COP] (1-1)", None);
        assert_eq!(builder().build(&fixture), builder().build(&fixture));
    }
}
