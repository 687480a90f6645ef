//! Core fixture model shared by the feed codec, the merge engine and the sync pipeline.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "fxcal-core";

/// Which provider a fixture came from. Only used for merge priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedRole {
    Primary,
    Secondary,
}

impl FeedRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedRole::Primary => "primary",
            FeedRole::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for FeedRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kick-off of a fixture, already converted to UTC when the feed carried a time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FixtureStart {
    /// `local_date` is the date on the wall clock of the zone the feed wrote the time in.
    Timed {
        at: DateTime<Utc>,
        local_date: NaiveDate,
    },
    AllDay(NaiveDate),
}

impl FixtureStart {
    /// A start written in UTC (or floating), where the local date is the UTC date.
    pub fn utc(at: DateTime<Utc>) -> Self {
        FixtureStart::Timed {
            at,
            local_date: at.date_naive(),
        }
    }

    pub fn zoned<Tz: TimeZone>(at: DateTime<Tz>) -> Self {
        FixtureStart::Timed {
            local_date: at.date_naive(),
            at: at.with_timezone(&Utc),
        }
    }

    /// Calendar date in UTC. All-day values are taken as-is.
    pub fn date_utc(&self) -> NaiveDate {
        match self {
            FixtureStart::Timed { at, .. } => at.date_naive(),
            FixtureStart::AllDay(date) => *date,
        }
    }

    pub fn local_date(&self) -> NaiveDate {
        match self {
            FixtureStart::Timed { local_date, .. } => *local_date,
            FixtureStart::AllDay(date) => *date,
        }
    }

    /// Year of the local date; year bounds are judged on this, not on the UTC date.
    pub fn year(&self) -> i32 {
        self.local_date().year()
    }

    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            FixtureStart::Timed { at, .. } => Some(*at),
            FixtureStart::AllDay(_) => None,
        }
    }
}

/// One content line of a calendar event, kept verbatim so it can be written back out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawProperty {
    pub name: String,
    #[serde(default)]
    pub params: Vec<(String, String)>,
    pub value: String,
}

impl RawProperty {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            value: value.into(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// A single match record as handed over by a feed adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub uid: Option<String>,
    pub summary: String,
    pub start: Option<FixtureStart>,
    pub source: FeedRole,
    /// Every property of the originating event in feed order, SUMMARY included.
    #[serde(default)]
    pub properties: Vec<RawProperty>,
}

impl Fixture {
    pub fn new(source: FeedRole, summary: impl Into<String>, start: Option<FixtureStart>) -> Self {
        Self {
            uid: None,
            summary: summary.into(),
            start,
            source,
            properties: Vec::new(),
        }
    }

    /// Copy of this fixture carrying a different summary.
    pub fn with_summary(&self, summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..self.clone()
        }
    }

    pub fn date_utc(&self) -> Option<NaiveDate> {
        self.start.as_ref().map(FixtureStart::date_utc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn timed_start_uses_utc_date() {
        let at = Utc.with_ymd_and_hms(2025, 9, 10, 23, 30, 0).single().unwrap();
        let start = FixtureStart::utc(at);
        assert_eq!(start.date_utc(), NaiveDate::from_ymd_opt(2025, 9, 10).unwrap());
        assert_eq!(start.year(), 2025);
        assert_eq!(start.instant(), Some(at));
    }

    #[test]
    fn zoned_start_keeps_local_year_across_new_year() {
        let rome = FixedOffset::east_opt(3600).unwrap();
        let at = rome.with_ymd_and_hms(2025, 1, 1, 0, 30, 0).single().unwrap();
        let start = FixtureStart::zoned(at);
        assert_eq!(start.date_utc(), NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
        assert_eq!(start.local_date(), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(start.year(), 2025);
        assert_eq!(
            start.instant(),
            Utc.with_ymd_and_hms(2024, 12, 31, 23, 30, 0).single()
        );
    }

    #[test]
    fn all_day_start_has_no_instant() {
        let start = FixtureStart::AllDay(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
        assert_eq!(start.year(), 2024);
        assert!(start.instant().is_none());
    }

    #[test]
    fn with_summary_keeps_everything_else() {
        let mut fixture = Fixture::new(FeedRole::Secondary, "Napoli - Inter", None);
        fixture.uid = Some("abc@feed".into());
        fixture.properties.push(RawProperty::new("LOCATION", "Maradona"));
        let relabelled = fixture.with_summary("X Napoli - Inter");
        assert_eq!(relabelled.summary, "X Napoli - Inter");
        assert_eq!(relabelled.uid, fixture.uid);
        assert_eq!(relabelled.properties, fixture.properties);
        assert_eq!(fixture.summary, "Napoli - Inter");
    }

    #[test]
    fn raw_property_param_lookup_is_case_insensitive() {
        let prop = RawProperty::new("DTSTART", "20250910T200000").with_param("TZID", "Europe/Rome");
        assert_eq!(prop.param("tzid"), Some("Europe/Rome"));
        assert!(prop.is("dtstart"));
    }
}
