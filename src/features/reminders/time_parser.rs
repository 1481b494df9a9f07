//! # Time Expression Parser
//!
//! Turns free text like `in 20 minutes`, `tomorrow at 9am` or `3/14 at 15:30`
//! into a wall-clock instant in the host's local time. Each grammar is an
//! independent matcher; they are tried in a fixed order and the first one that
//! recognises the text decides the result.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.1.0: Compact duration grammar (`1h30m`) and bare clock times
//! - 1.0.0: Initial grammars (relative, tomorrow, today, explicit date, fallback)

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use log::debug;
use regex::Regex;
use std::sync::OnceLock;

/// Result of a single grammar matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Match {
    /// The text is not in this grammar's shape; try the next one
    NoMatch,
    /// The text is in this grammar's shape but names no usable instant
    Rejected,
    Instant(NaiveDateTime),
}

type Matcher = fn(&str, NaiveDateTime) -> Match;

/// Grammars in precedence order
const GRAMMARS: &[(&str, Matcher)] = &[
    ("relative", match_relative),
    ("tomorrow", match_tomorrow_at),
    ("today", match_today_at),
    ("date", match_explicit_date),
    ("compact", match_compact_duration),
    ("fallback", match_timestamp),
];

/// Parse a time expression relative to `now`.
///
/// Returns `None` when no grammar matches, or when the matching grammar
/// resolves to a slot that is already in the past.
pub fn parse_time_expression(text: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    for (name, matcher) in GRAMMARS {
        match matcher(text, now) {
            Match::NoMatch => continue,
            Match::Rejected => {
                debug!("Time expression {text:?} matched {name} grammar but was rejected");
                return None;
            }
            Match::Instant(instant) => return Some(instant),
        }
    }

    debug!("Time expression {text:?} did not match any grammar");
    None
}

/// Convert a local wall-clock instant to UTC.
///
/// Ambiguous local times (DST fall-back) resolve to the earlier instant;
/// non-existent ones (DST spring-forward gap) yield `None`.
pub fn local_to_utc(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Current local wall-clock time
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

const CLOCK: &str = r"(\d{1,2})(?::(\d{2}))?\s*(am|pm|a\.m\.|p\.m\.)?";

fn relative_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"(?i)^in\s+(\d+)\s+(minutes?|mins?|hours?|hrs?|days?)$")
}

fn tomorrow_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, &format!(r"(?i)^tomorrow\s+at\s+{CLOCK}$"))
}

fn today_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, &format!(r"(?i)^today\s+at\s+{CLOCK}$"))
}

fn bare_clock_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    // Only unambiguous clock times: a meridiem or a minutes part is required
    cached(
        &RE,
        r"(?i)^(?:(\d{1,2})(?::(\d{2}))?\s*(am|pm|a\.m\.|p\.m\.)|(\d{1,2}):(\d{2}))$",
    )
}

fn date_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(
        &RE,
        &format!(r"(?i)^(\d{{1,2}})/(\d{{1,2}})(?:/(\d{{2}}|\d{{4}}))?\s+at\s+{CLOCK}$"),
    )
}

fn compact_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"(?i)^(?:\d+\s*[smhdw]\s*)+$")
}

fn match_relative(text: &str, now: NaiveDateTime) -> Match {
    let Some(caps) = relative_re().and_then(|re| re.captures(text)) else {
        return Match::NoMatch;
    };
    let Ok(amount) = caps[1].parse::<i64>() else {
        return Match::Rejected;
    };

    let unit = caps[2].to_lowercase();
    let offset = if unit.starts_with('m') {
        Duration::try_minutes(amount)
    } else if unit.starts_with('h') {
        Duration::try_hours(amount)
    } else {
        Duration::try_days(amount)
    };

    match offset.and_then(|d| now.checked_add_signed(d)) {
        Some(instant) => Match::Instant(instant),
        None => Match::Rejected,
    }
}

fn match_tomorrow_at(text: &str, now: NaiveDateTime) -> Match {
    let Some(caps) = tomorrow_re().and_then(|re| re.captures(text)) else {
        return Match::NoMatch;
    };
    let Some(time) = clock_time(caps.get(1), caps.get(2), caps.get(3)) else {
        return Match::Rejected;
    };
    match now.date().succ_opt() {
        Some(date) => Match::Instant(date.and_time(time)),
        None => Match::Rejected,
    }
}

fn match_today_at(text: &str, now: NaiveDateTime) -> Match {
    let time = if let Some(caps) = today_re().and_then(|re| re.captures(text)) {
        clock_time(caps.get(1), caps.get(2), caps.get(3))
    } else if let Some(caps) = bare_clock_re().and_then(|re| re.captures(text)) {
        if caps.get(1).is_some() {
            clock_time(caps.get(1), caps.get(2), caps.get(3))
        } else {
            clock_time(caps.get(4), caps.get(5), None)
        }
    } else {
        return Match::NoMatch;
    };

    let Some(time) = time else {
        return Match::Rejected;
    };
    future_only(now.date().and_time(time), now)
}

fn match_explicit_date(text: &str, now: NaiveDateTime) -> Match {
    let Some(caps) = date_re().and_then(|re| re.captures(text)) else {
        return Match::NoMatch;
    };

    let month = caps[1].parse::<u32>().ok();
    let day = caps[2].parse::<u32>().ok();
    let year = match caps.get(3) {
        Some(y) => y.as_str().parse::<i32>().ok().map(|y| if y < 100 { 2000 + y } else { y }),
        None => Some(now.year()),
    };

    let date = match (year, month, day) {
        (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y, m, d),
        _ => None,
    };
    let time = clock_time(caps.get(4), caps.get(5), caps.get(6));

    match (date, time) {
        (Some(date), Some(time)) => future_only(date.and_time(time), now),
        _ => Match::Rejected,
    }
}

/// `30m`, `2h`, `1d`, `1w`, `1h30m`
fn match_compact_duration(text: &str, now: NaiveDateTime) -> Match {
    if compact_re().map_or(true, |re| !re.is_match(text)) {
        return Match::NoMatch;
    }
    match compact_duration_seconds(text) {
        Some(secs) => match Duration::try_seconds(secs).and_then(|d| now.checked_add_signed(d)) {
            Some(instant) => Match::Instant(instant),
            None => Match::Rejected,
        },
        None => Match::Rejected,
    }
}

/// Sum a compact duration string into seconds; zero totals are not durations
pub fn compact_duration_seconds(text: &str) -> Option<i64> {
    let text = text.trim().to_lowercase();
    let mut total_seconds: i64 = 0;
    let mut current_number = String::new();

    for c in text.chars() {
        if c.is_ascii_digit() {
            current_number.push(c);
        } else if c.is_whitespace() {
            continue;
        } else {
            if current_number.is_empty() {
                return None;
            }
            let value: i64 = current_number.parse().ok()?;
            current_number.clear();

            let unit = match c {
                's' => 1,
                'm' => 60,
                'h' => 60 * 60,
                'd' => 60 * 60 * 24,
                'w' => 60 * 60 * 24 * 7,
                _ => return None,
            };
            total_seconds = total_seconds.checked_add(value.checked_mul(unit)?)?;
        }
    }

    if !current_number.is_empty() || total_seconds == 0 {
        None
    } else {
        Some(total_seconds)
    }
}

fn match_timestamp(text: &str, _now: NaiveDateTime) -> Match {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Match::Instant(dt.with_timezone(&Local).naive_local());
    }

    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map_or(Match::NoMatch, Match::Instant)
}

fn future_only(candidate: NaiveDateTime, now: NaiveDateTime) -> Match {
    if candidate > now {
        Match::Instant(candidate)
    } else {
        Match::Rejected
    }
}

/// Build a wall-clock time from hour/minute/meridiem captures.
///
/// `pm` adds 12 unless the hour is already 12 or more; `12am` is midnight.
fn clock_time(
    hour: Option<regex::Match<'_>>,
    minute: Option<regex::Match<'_>>,
    meridiem: Option<regex::Match<'_>>,
) -> Option<NaiveTime> {
    let mut hour: u32 = hour?.as_str().parse().ok()?;
    let minute: u32 = match minute {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };

    match meridiem.map(|m| m.as_str().to_lowercase().replace('.', "")) {
        Some(ref m) if m == "pm" => {
            if hour < 12 {
                hour += 12;
            }
        }
        Some(ref m) if m == "am" => {
            if hour == 12 {
                hour = 0;
            }
        }
        _ => {}
    }

    NaiveTime::from_hms_opt(hour, minute, 0)
}
