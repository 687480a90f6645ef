//! Fixture identity resolution and merge engine.
//!
//! The primary feed is authoritative: all of its in-domain fixtures are kept. Secondary fixtures
//! are kept only when no fixture accepted so far shares their UTC date and at least one opponent
//! token. The heuristic can over- or under-merge on unusual spellings; that is an accepted bound.

pub mod engine;
pub mod filter;
pub mod policy;
pub mod presentation;
pub mod signature;

pub use engine::{
    merge_feeds, DecisionOutcome, MergeDecision, MergeEngine, MergeError, MergeOptions, MergeReport,
    MergedSet, PhaseStats,
};
pub use filter::{EventFilter, FilterError, FilterOptions, Rejection, YearBound, YearMode};
pub use policy::{DuplicateMatch, MatchPolicy, MatchPolicyConfig, MatchReason, SignatureIndex};
pub use presentation::{Presentation, DEFAULT_LABEL_PREFIX};
pub use signature::{normalize_summary, split_sides, Signature, SignatureBuilder, SignatureOptions};

pub const CRATE_NAME: &str = "fxcal-merge";
