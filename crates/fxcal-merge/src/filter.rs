//! In-domain selection of raw fixtures: subject keyword, year bound, competition class.

use fxcal_core::Fixture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SUBJECT_KEYWORD: &str = "Napoli";
pub const DEFAULT_MINIMUM_YEAR: i32 = 2025;
pub const DEFAULT_CUP_MARKERS: &[&str] = &["[cop]", "coppa", "supercoppa", "super cup"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("minimum_year={minimum} and excluded_year={excluded} cannot both be set")]
    ConflictingYearBounds { minimum: i32, excluded: i32 },
    #[error("subject team keyword must not be empty")]
    EmptyKeyword,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YearMode {
    /// Keep fixtures from `year` onwards.
    AtLeast,
    /// Drop fixtures played in `year`.
    Excluding,
}

/// The single year restriction active for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearBound {
    pub year: i32,
    pub mode: YearMode,
}

impl YearBound {
    pub fn at_least(year: i32) -> Self {
        Self {
            year,
            mode: YearMode::AtLeast,
        }
    }

    pub fn excluding(year: i32) -> Self {
        Self {
            year,
            mode: YearMode::Excluding,
        }
    }

    /// Builds the bound from the two mutually exclusive option keys.
    pub fn from_options(
        minimum_year: Option<i32>,
        excluded_year: Option<i32>,
    ) -> Result<Option<Self>, FilterError> {
        match (minimum_year, excluded_year) {
            (Some(minimum), Some(excluded)) => {
                Err(FilterError::ConflictingYearBounds { minimum, excluded })
            }
            (Some(minimum), None) => Ok(Some(Self::at_least(minimum))),
            (None, Some(excluded)) => Ok(Some(Self::excluding(excluded))),
            (None, None) => Ok(None),
        }
    }

    pub fn admits(&self, year: i32) -> bool {
        match self.mode {
            YearMode::AtLeast => year >= self.year,
            YearMode::Excluding => year != self.year,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub subject_team_keyword: String,
    pub year_bound: Option<YearBound>,
    pub cup_markers: Vec<String>,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            subject_team_keyword: DEFAULT_SUBJECT_KEYWORD.to_string(),
            year_bound: Some(YearBound::at_least(DEFAULT_MINIMUM_YEAR)),
            cup_markers: DEFAULT_CUP_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

/// Why a fixture was left out of the merged set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    MissingKeyword,
    MissingTimestamp,
    OutOfYearRange { year: i32 },
    NotCupCompetition,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::MissingKeyword => f.write_str("subject keyword not in summary"),
            Rejection::MissingTimestamp => f.write_str("no start time while a year bound is set"),
            Rejection::OutOfYearRange { year } => write!(f, "year {year} outside bound"),
            Rejection::NotCupCompetition => f.write_str("not a cup competition"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventFilter {
    options: FilterOptions,
    keyword_folded: String,
    markers_folded: Vec<String>,
}

impl EventFilter {
    pub fn new(options: FilterOptions) -> Result<Self, FilterError> {
        let keyword_folded = options.subject_team_keyword.trim().to_lowercase();
        if keyword_folded.is_empty() {
            return Err(FilterError::EmptyKeyword);
        }
        let markers_folded = options
            .cup_markers
            .iter()
            .map(|m| m.trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        Ok(Self {
            options,
            keyword_folded,
            markers_folded,
        })
    }

    pub fn options(&self) -> &FilterOptions {
        &self.options
    }

    /// First failing test for `fixture`, or `None` when it is in-domain.
    pub fn rejection(&self, fixture: &Fixture, cup_only: bool) -> Option<Rejection> {
        if !self.mentions_subject(&fixture.summary) {
            return Some(Rejection::MissingKeyword);
        }

        if let Some(bound) = &self.options.year_bound {
            let Some(start) = &fixture.start else {
                return Some(Rejection::MissingTimestamp);
            };
            let year = start.year();
            if !bound.admits(year) {
                return Some(Rejection::OutOfYearRange { year });
            }
        }

        if cup_only && !self.is_cup_competition(&fixture.summary) {
            return Some(Rejection::NotCupCompetition);
        }

        None
    }

    pub fn select(&self, fixture: &Fixture, cup_only: bool) -> bool {
        self.rejection(fixture, cup_only).is_none()
    }

    pub fn mentions_subject(&self, summary: &str) -> bool {
        !summary.trim().is_empty() && summary.to_lowercase().contains(&self.keyword_folded)
    }

    /// Substring recognizer for cup and super-cup fixtures.
    pub fn is_cup_competition(&self, summary: &str) -> bool {
        let folded = summary.to_lowercase();
        self.markers_folded.iter().any(|marker| folded.contains(marker))
    }
}
