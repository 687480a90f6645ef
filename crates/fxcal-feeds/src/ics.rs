//! Fixture view of iCalendar feeds. Reading and writing the format itself (unfolding, folding,
//! parameters, CRLF) is left to `icalendar`; this module maps events to fixtures and resolves
//! kick-off times.

use std::collections::HashSet;

use chrono::{Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use fxcal_core::{FeedRole, Fixture, FixtureStart, RawProperty};
use icalendar::{Calendar, CalendarComponent, Component, Event, Property};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Time-valued properties rewritten to UTC on output, so the merged calendar needs no VTIMEZONE.
const ZONED_PROPERTIES: &[&str] = &["DTSTART", "DTEND", "RECURRENCE-ID"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("input is not an iCalendar stream (no BEGIN:VCALENDAR)")]
    NotACalendar,
    #[error("malformed calendar: {0}")]
    Malformed(String),
    #[error("unparsable date/time value {value:?}")]
    InvalidDate { value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalendarHeader {
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCalendar {
    pub header: CalendarHeader,
    pub fixtures: Vec<Fixture>,
}

/// Reads DTSTART-style values. TZID local times are resolved to UTC; floating times are taken as UTC.
pub fn parse_start(prop: &RawProperty) -> Result<FixtureStart, CodecError> {
    let value = prop.value.trim();
    let invalid = || CodecError::InvalidDate {
        value: value.to_string(),
    };

    let is_date = prop
        .param("VALUE")
        .map(|v| v.eq_ignore_ascii_case("DATE"))
        .unwrap_or(false)
        || (value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()));
    if is_date {
        return NaiveDate::parse_from_str(value, "%Y%m%d")
            .map(FixtureStart::AllDay)
            .map_err(|_| invalid());
    }

    let (local, utc) = match value.strip_suffix(['Z', 'z']) {
        Some(stripped) => (stripped, true),
        None => (value, false),
    };
    let naive = NaiveDateTime::parse_from_str(local, "%Y%m%dT%H%M%S")
        .or_else(|_| NaiveDateTime::parse_from_str(local, "%Y%m%dT%H%M"))
        .map_err(|_| invalid())?;

    if utc {
        return Ok(FixtureStart::utc(Utc.from_utc_datetime(&naive)));
    }

    if let Some(tzid) = prop.param("TZID") {
        match tzid.trim_start_matches('/').parse::<Tz>() {
            Ok(tz) => return resolve_wall_clock(tz, naive).ok_or_else(invalid),
            Err(_) => warn!(tzid, "unknown TZID, treating start as UTC"),
        }
    }

    Ok(FixtureStart::utc(Utc.from_utc_datetime(&naive)))
}

/// An ambiguous wall-clock time takes the earlier instant. A time inside a spring-forward gap
/// is read with the offset in force just before the gap, which lands it past the gap.
fn resolve_wall_clock(tz: Tz, naive: NaiveDateTime) -> Option<FixtureStart> {
    let at = match tz.from_local_datetime(&naive).earliest() {
        Some(at) => at.with_timezone(&Utc),
        None => (1..=8).map(|n| Duration::minutes(15 * n)).find_map(|back| {
            tz.from_local_datetime(&(naive - back))
                .earliest()
                .map(|before| before.with_timezone(&Utc) + back)
        })?,
    };
    Some(FixtureStart::Timed {
        at,
        local_date: naive.date(),
    })
}

pub fn parse_calendar(text: &str, role: FeedRole) -> Result<ParsedCalendar, CodecError> {
    let text = text.trim_start_matches('\u{feff}');
    let is_calendar = text
        .trim_start()
        .get(..15)
        .is_some_and(|head| head.eq_ignore_ascii_case("BEGIN:VCALENDAR"));
    if !is_calendar {
        return Err(CodecError::NotACalendar);
    }

    let calendar: Calendar = crlf_lines(text)
        .parse()
        .map_err(|err| CodecError::Malformed(format!("{err}")))?;

    let name = calendar
        .properties
        .iter()
        .find(|p| p.key().eq_ignore_ascii_case("X-WR-CALNAME"))
        .map(|p| p.value().to_string());
    let fixtures = calendar
        .components
        .iter()
        .filter_map(|component| match component {
            CalendarComponent::Event(event) => Some(event_to_fixture(event, role)),
            _ => None,
        })
        .collect();

    Ok(ParsedCalendar {
        header: CalendarHeader { name },
        fixtures,
    })
}

/// Feeds arrive with CRLF, bare LF or a mix; blank lines are dropped.
fn crlf_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .fold(String::with_capacity(text.len() + 64), |mut out, line| {
            out.push_str(line);
            out.push_str("\r\n");
            out
        })
}

fn raw_property(prop: &Property) -> RawProperty {
    let mut params: Vec<(String, String)> = prop
        .params()
        .iter()
        .map(|(key, param)| (key.to_ascii_uppercase(), param.value().to_string()))
        .collect();
    params.sort();
    RawProperty {
        name: prop.key().to_ascii_uppercase(),
        params,
        value: prop.value().to_string(),
    }
}

fn event_to_fixture(event: &Event, role: FeedRole) -> Fixture {
    let properties: Vec<RawProperty> = event.properties().values().map(raw_property).collect();
    let find = |name: &str| properties.iter().find(|p| p.is(name));

    let summary = find("SUMMARY").map(|p| p.value.clone()).unwrap_or_default();
    let mut fixture = Fixture::new(role, summary, None);
    fixture.uid = find("UID")
        .map(|p| p.value.trim().to_string())
        .filter(|uid| !uid.is_empty());
    if let Some(dtstart) = find("DTSTART") {
        match parse_start(dtstart) {
            Ok(start) => fixture.start = Some(start),
            Err(err) => warn!(summary = %fixture.summary, error = %err, "dropping unreadable DTSTART"),
        }
    }

    fixture.properties = properties;
    fixture
}

/// Renders the merged calendar. UID, SUMMARY and DTSTART come from the fixture; everything else
/// is carried over from the feed event.
pub fn render_calendar(header: &CalendarHeader, fixtures: &[Fixture]) -> String {
    let mut calendar = Calendar::new();
    if let Some(name) = &header.name {
        calendar.name(name);
    }

    let mut seen_uids = HashSet::new();
    for fixture in fixtures {
        calendar.push(fixture_to_event(fixture, &mut seen_uids));
    }

    calendar.to_string()
}

fn fixture_to_event(fixture: &Fixture, seen_uids: &mut HashSet<String>) -> Event {
    let mut event = Event::new();
    for prop in &fixture.properties {
        if prop.is("UID") || prop.is("SUMMARY") || (prop.is("DTSTART") && fixture.start.is_some()) {
            continue;
        }
        event.append_property(zoned_in_utc(prop).unwrap_or_else(|| ical_property(prop)));
    }

    event.uid(&unique_uid(fixture, seen_uids));
    event.summary(&fixture.summary);
    if let Some(start) = fixture.start {
        event.append_property(time_property("DTSTART", start));
    }
    event
}

fn ical_property(raw: &RawProperty) -> Property {
    let mut prop = Property::new(&raw.name, &raw.value);
    for (key, value) in &raw.params {
        prop.add_parameter(key, value);
    }
    prop
}

fn zoned_in_utc(prop: &RawProperty) -> Option<Property> {
    prop.param("TZID")?;
    if !ZONED_PROPERTIES.iter().any(|name| prop.is(name)) {
        return None;
    }
    match parse_start(prop) {
        Ok(value) => Some(time_property(&prop.name, value)),
        Err(err) => {
            warn!(property = %prop.name, error = %err, "keeping unreadable zoned time as written");
            None
        }
    }
}

fn time_property(name: &str, value: FixtureStart) -> Property {
    match value {
        FixtureStart::Timed { at, .. } => {
            Property::new(name, &at.format("%Y%m%dT%H%M%SZ").to_string())
        }
        FixtureStart::AllDay(date) => {
            let mut prop = Property::new(name, &date.format("%Y%m%d").to_string());
            prop.add_parameter("VALUE", "DATE");
            prop
        }
    }
}

/// Feed UID when present and unused, otherwise a stable id derived from summary and start.
fn unique_uid(fixture: &Fixture, seen: &mut HashSet<String>) -> String {
    let base = fixture.uid.clone().unwrap_or_else(|| {
        let seed = format!("{}|{:?}", fixture.summary, fixture.start);
        format!("{}@fxcal", Uuid::new_v5(&Uuid::NAMESPACE_URL, seed.as_bytes()))
    });
    let mut candidate = base.clone();
    let mut n = 2;
    while !seen.insert(candidate.clone()) {
        candidate = format!("{base}-{n}");
        n += 1;
    }
    candidate
}
