//! Duplicate test for secondary fixtures against signatures accepted so far.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::signature::Signature;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPolicyConfig {
    /// Same kick-off minute on both feeds counts as a duplicate before any text comparison.
    pub exact_time_precheck: bool,
    /// Shortest token that may carry an overlap when either side fell back to its whole summary.
    pub min_fallback_token_len: usize,
}

impl Default for MatchPolicyConfig {
    fn default() -> Self {
        Self {
            exact_time_precheck: false,
            min_fallback_token_len: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchReason {
    ExactTime,
    ExactKey,
    SharedTokens { tokens: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateMatch {
    /// Position of the already accepted fixture in the merged set.
    pub position: usize,
    pub reason: MatchReason,
}

#[derive(Debug, Clone)]
struct IndexedSignature {
    position: usize,
    signature: Signature,
}

/// Accepted signatures grouped by date key. Dateless signatures are never indexed.
#[derive(Debug, Clone, Default)]
pub struct SignatureIndex {
    by_date: HashMap<NaiveDate, Vec<IndexedSignature>>,
    len: usize,
}

impl SignatureIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, signature: Signature, position: usize) {
        let Some(date) = signature.date_key else {
            return;
        };
        self.by_date
            .entry(date)
            .or_default()
            .push(IndexedSignature { position, signature });
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.by_date.contains_key(&date)
    }

    fn on_date(&self, date: NaiveDate) -> &[IndexedSignature] {
        self.by_date.get(&date).map(Vec::as_slice).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MatchPolicy {
    config: MatchPolicyConfig,
}

impl MatchPolicy {
    pub fn new(config: MatchPolicyConfig) -> Self {
        Self { config }
    }

    pub fn is_duplicate(&self, candidate: &Signature, index: &SignatureIndex) -> bool {
        self.find_duplicate(candidate, index).is_some()
    }

    /// First accepted signature on the candidate's date that it duplicates.
    pub fn find_duplicate(
        &self,
        candidate: &Signature,
        index: &SignatureIndex,
    ) -> Option<DuplicateMatch> {
        let date = candidate.date_key?;
        index.on_date(date).iter().find_map(|accepted| {
            self.compare(candidate, &accepted.signature)
                .map(|reason| DuplicateMatch {
                    position: accepted.position,
                    reason,
                })
        })
    }

    fn compare(&self, candidate: &Signature, accepted: &Signature) -> Option<MatchReason> {
        if self.config.exact_time_precheck {
            if let (Some(a), Some(b)) = (candidate.instant, accepted.instant) {
                if a.timestamp() / 60 == b.timestamp() / 60 {
                    return Some(MatchReason::ExactTime);
                }
            }
        }

        if let (Some(a), Some(b)) = (&candidate.exact_key, &accepted.exact_key) {
            if a == b {
                return Some(MatchReason::ExactKey);
            }
        }

        let strict = !candidate.is_structured() || !accepted.is_structured();
        let shared: Vec<String> = candidate
            .team_tokens
            .intersection(&accepted.team_tokens)
            .filter(|t| !strict || t.chars().count() >= self.config.min_fallback_token_len)
            .cloned()
            .collect();
        if shared.is_empty() {
            None
        } else {
            Some(MatchReason::SharedTokens { tokens: shared })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::BTreeSet;

    fn date(d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2025, 9, d)
    }

    fn instant(d: u32, h: u32) -> Option<DateTime<Utc>> {
        Utc.with_ymd_and_hms(2025, 9, d, h, 0, 0).single()
    }

    fn sig(d: u32, tokens: &[&str]) -> Signature {
        Signature {
            date_key: date(d),
            team_tokens: tokens.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
            exact_key: None,
            instant: None,
        }
    }

    #[test]
    fn shared_token_on_same_date_is_duplicate() {
        let mut index = SignatureIndex::new();
        index.insert(sig(10, &["inter"]), 0);
        let policy = MatchPolicy::default();
        let found = policy.find_duplicate(&sig(10, &["inter", "milano"]), &index).unwrap();
        assert_eq!(found.position, 0);
        assert_eq!(
            found.reason,
            MatchReason::SharedTokens {
                tokens: vec!["inter".into()]
            }
        );
    }

    #[test]
    fn different_date_or_opponent_is_kept() {
        let mut index = SignatureIndex::new();
        index.insert(sig(10, &["inter"]), 0);
        let policy = MatchPolicy::default();
        assert!(!policy.is_duplicate(&sig(11, &["inter"]), &index));
        assert!(!policy.is_duplicate(&sig(10, &["lazio"]), &index));
    }

    #[test]
    fn dateless_candidate_never_matches() {
        let mut index = SignatureIndex::new();
        index.insert(sig(10, &["inter"]), 0);
        let mut candidate = sig(10, &["inter"]);
        candidate.date_key = None;
        assert!(!MatchPolicy::default().is_duplicate(&candidate, &index));
    }

    #[test]
    fn dateless_signatures_are_not_indexed() {
        let mut index = SignatureIndex::new();
        let mut dateless = sig(10, &["inter"]);
        dateless.date_key = None;
        index.insert(dateless, 0);
        assert!(index.is_empty());
    }

    #[test]
    fn first_match_on_date_wins() {
        let mut index = SignatureIndex::new();
        index.insert(sig(10, &["inter"]), 3);
        index.insert(sig(10, &["inter", "milan"]), 7);
        let found = MatchPolicy::default()
            .find_duplicate(&sig(10, &["inter"]), &index)
            .unwrap();
        assert_eq!(found.position, 3);
    }

    #[test]
    fn fallback_signatures_ignore_short_tokens_but_match_exact_keys() {
        let mut accepted = sig(10, &["at", "roma"]);
        accepted.exact_key = Some("napoli at roma".into());
        let mut index = SignatureIndex::new();
        index.insert(accepted, 0);
        let policy = MatchPolicy::default();

        let mut short_only = sig(10, &["at", "bari"]);
        short_only.exact_key = Some("napoli at bari".into());
        assert!(!policy.is_duplicate(&short_only, &index));

        let mut same_text = sig(10, &[]);
        same_text.exact_key = Some("napoli at roma".into());
        assert_eq!(
            policy.find_duplicate(&same_text, &index).map(|m| m.reason),
            Some(MatchReason::ExactKey)
        );
    }

    #[test]
    fn exact_time_precheck_is_opt_in() {
        let mut accepted = sig(10, &["inter"]);
        accepted.instant = instant(10, 18);
        let mut index = SignatureIndex::new();
        index.insert(accepted, 0);

        let mut candidate = sig(10, &["internazionale"]);
        candidate.instant = instant(10, 18);

        assert!(!MatchPolicy::default().is_duplicate(&candidate, &index));
        let strict = MatchPolicy::new(MatchPolicyConfig {
            exact_time_precheck: true,
            ..MatchPolicyConfig::default()
        });
        assert_eq!(
            strict.find_duplicate(&candidate, &index).map(|m| m.reason),
            Some(MatchReason::ExactTime)
        );
    }
}
