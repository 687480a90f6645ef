//! Two-phase merge: every in-domain primary fixture, then the secondary fixtures nobody has yet.

use chrono::NaiveDate;
use fxcal_core::{FeedRole, Fixture};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::filter::{EventFilter, FilterError, FilterOptions, Rejection};
use crate::policy::{MatchPolicy, MatchPolicyConfig, MatchReason, SignatureIndex};
use crate::presentation::{Presentation, DEFAULT_LABEL_PREFIX};
use crate::signature::{SignatureBuilder, SignatureOptions};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error("cannot ingest {attempted} fixtures once the {current} phase has started")]
    PhaseOrder {
        attempted: FeedRole,
        current: FeedRole,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOptions {
    pub filter: FilterOptions,
    pub signature: SignatureOptions,
    pub policy: MatchPolicyConfig,
    /// Restrict the secondary feed to cup competitions.
    pub secondary_cup_only: bool,
    pub label_prefix: String,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            filter: FilterOptions::default(),
            signature: SignatureOptions::default(),
            policy: MatchPolicyConfig::default(),
            secondary_cup_only: true,
            label_prefix: DEFAULT_LABEL_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseStats {
    pub seen: usize,
    pub accepted: usize,
    pub missing_keyword: usize,
    pub missing_timestamp: usize,
    pub out_of_year_range: usize,
    pub not_cup_competition: usize,
    pub duplicates: usize,
}

impl PhaseStats {
    fn record_rejection(&mut self, rejection: Rejection) {
        match rejection {
            Rejection::MissingKeyword => self.missing_keyword += 1,
            Rejection::MissingTimestamp => self.missing_timestamp += 1,
            Rejection::OutOfYearRange { .. } => self.out_of_year_range += 1,
            Rejection::NotCupCompetition => self.not_cup_competition += 1,
        }
    }

    pub fn filtered(&self) -> usize {
        self.missing_keyword + self.missing_timestamp + self.out_of_year_range + self.not_cup_competition
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Accepted { position: usize },
    Filtered { reason: Rejection },
    Duplicate {
        of_position: usize,
        of_summary: String,
        reason: MatchReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeDecision {
    pub role: FeedRole,
    pub summary: String,
    pub date: Option<NaiveDate>,
    #[serde(flatten)]
    pub outcome: DecisionOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub primary: PhaseStats,
    pub secondary: PhaseStats,
    pub decisions: Vec<MergeDecision>,
}

impl MergeReport {
    pub fn stats(&self, role: FeedRole) -> &PhaseStats {
        match role {
            FeedRole::Primary => &self.primary,
            FeedRole::Secondary => &self.secondary,
        }
    }

    fn stats_mut(&mut self, role: FeedRole) -> &mut PhaseStats {
        match role {
            FeedRole::Primary => &mut self.primary,
            FeedRole::Secondary => &mut self.secondary,
        }
    }
}

/// Accepted fixtures in accumulation order, labelled, plus the audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedSet {
    pub fixtures: Vec<Fixture>,
    pub report: MergeReport,
}

pub struct MergeEngine {
    filter: EventFilter,
    builder: SignatureBuilder,
    policy: MatchPolicy,
    presentation: Presentation,
    secondary_cup_only: bool,
    phase: FeedRole,
    accepted: Vec<Fixture>,
    index: SignatureIndex,
    report: MergeReport,
}

impl MergeEngine {
    pub fn new(options: MergeOptions) -> Result<Self, MergeError> {
        let builder = SignatureBuilder::new(&options.filter.subject_team_keyword, &options.signature);
        let filter = EventFilter::new(options.filter)?;
        Ok(Self {
            filter,
            builder,
            policy: MatchPolicy::new(options.policy),
            presentation: Presentation::new(options.label_prefix),
            secondary_cup_only: options.secondary_cup_only,
            phase: FeedRole::Primary,
            accepted: Vec::new(),
            index: SignatureIndex::new(),
            report: MergeReport::default(),
        })
    }

    pub fn phase(&self) -> FeedRole {
        self.phase
    }

    /// Accepts every in-domain fixture; the primary feed is never deduplicated.
    pub fn ingest_primary(
        &mut self,
        fixtures: impl IntoIterator<Item = Fixture>,
    ) -> Result<PhaseStats, MergeError> {
        if self.phase != FeedRole::Primary {
            return Err(MergeError::PhaseOrder {
                attempted: FeedRole::Primary,
                current: self.phase,
            });
        }
        self.ingest(FeedRole::Primary, fixtures)
    }

    /// Moves the engine into its terminal phase; may be called for several batches.
    pub fn ingest_secondary(
        &mut self,
        fixtures: impl IntoIterator<Item = Fixture>,
    ) -> Result<PhaseStats, MergeError> {
        self.phase = FeedRole::Secondary;
        self.ingest(FeedRole::Secondary, fixtures)
    }

    pub fn finish(self) -> MergedSet {
        MergedSet {
            fixtures: self.accepted,
            report: self.report,
        }
    }

    fn ingest(
        &mut self,
        role: FeedRole,
        fixtures: impl IntoIterator<Item = Fixture>,
    ) -> Result<PhaseStats, MergeError> {
        let before = *self.report.stats(role);
        for fixture in fixtures {
            self.consider(role, fixture);
        }
        let after = *self.report.stats(role);
        let batch = PhaseStats {
            seen: after.seen - before.seen,
            accepted: after.accepted - before.accepted,
            missing_keyword: after.missing_keyword - before.missing_keyword,
            missing_timestamp: after.missing_timestamp - before.missing_timestamp,
            out_of_year_range: after.out_of_year_range - before.out_of_year_range,
            not_cup_competition: after.not_cup_competition - before.not_cup_competition,
            duplicates: after.duplicates - before.duplicates,
        };
        info!(
            feed = %role,
            seen = batch.seen,
            accepted = batch.accepted,
            filtered = batch.filtered(),
            duplicates = batch.duplicates,
            total = self.accepted.len(),
            "merge phase complete"
        );
        Ok(batch)
    }

    fn consider(&mut self, role: FeedRole, fixture: Fixture) {
        self.report.stats_mut(role).seen += 1;
        let date = fixture.date_utc();
        let cup_only = role == FeedRole::Secondary && self.secondary_cup_only;

        if let Some(reason) = self.filter.rejection(&fixture, cup_only) {
            debug!(feed = %role, summary = %fixture.summary, %reason, "fixture filtered");
            self.report.stats_mut(role).record_rejection(reason);
            self.report.decisions.push(MergeDecision {
                role,
                summary: fixture.summary,
                date,
                outcome: DecisionOutcome::Filtered { reason },
            });
            return;
        }

        let signature = self.builder.build(&fixture);

        if role == FeedRole::Secondary {
            if let Some(found) = self.policy.find_duplicate(&signature, &self.index) {
                let of_summary = self.accepted[found.position].summary.clone();
                debug!(
                    feed = %role,
                    summary = %fixture.summary,
                    duplicate_of = %of_summary,
                    "fixture already present"
                );
                self.report.stats_mut(role).duplicates += 1;
                self.report.decisions.push(MergeDecision {
                    role,
                    summary: fixture.summary,
                    date,
                    outcome: DecisionOutcome::Duplicate {
                        of_position: found.position,
                        of_summary,
                        reason: found.reason,
                    },
                });
                return;
            }
        }

        let position = self.accepted.len();
        let labelled = self.presentation.label(&fixture);
        debug!(feed = %role, summary = %labelled.summary, position, "fixture accepted");
        self.index.insert(signature, position);
        self.accepted.push(labelled);
        self.report.stats_mut(role).accepted += 1;
        self.report.decisions.push(MergeDecision {
            role,
            summary: fixture.summary,
            date,
            outcome: DecisionOutcome::Accepted { position },
        });
    }
}

/// Runs both phases over fully materialised feeds.
pub fn merge_feeds(
    options: MergeOptions,
    primary: Vec<Fixture>,
    secondary: Vec<Fixture>,
) -> Result<MergedSet, MergeError> {
    let mut engine = MergeEngine::new(options)?;
    engine.ingest_primary(primary)?;
    engine.ingest_secondary(secondary)?;
    Ok(engine.finish())
}
