//! # Reminder Command Parser
//!
//! Splits a free-text reminder command into subject, due instant and
//! recurrence:
//!
//! ```text
//! !remind in 2 hours to call mom
//! remind me call mom at tomorrow at 3pm daily
//! ```
//!
//! The leading command token (`!remind`, `/remind`, `remind`, each with an
//! optional `me`) is dropped, as is a bare leading `me`. Then a trailing
//! recurrence word is stripped. The rest is tried as
//! `<time> to|about <subject>` and then as `<subject> at|on <time>`; within
//! each shape every separator occurrence is tried left to right until the
//! time side parses.
//!
//! - **Version**: 1.0.1
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.0.1: Accept a bare leading `me`
//! - 1.0.0: Initial release

use super::model::Recurrence;
use super::time_parser::{local_now, parse_time_expression};
use chrono::NaiveDateTime;
use log::debug;
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub text: String,
    /// Local wall-clock instant
    pub instant: NaiveDateTime,
    pub recurrence: Option<Recurrence>,
}

/// Which side of the separator holds the time expression
#[derive(Debug, Clone, Copy)]
enum Shape {
    TimeThenSubject,
    SubjectThenTime,
}

const SUFFIXES: &[(&str, Recurrence)] = &[
    (r"(?i)\s+daily$", Recurrence::Daily),
    (r"(?i)\s+every\s+day$", Recurrence::Daily),
    (r"(?i)\s+weekly$", Recurrence::Weekly),
    (r"(?i)\s+every\s+week$", Recurrence::Weekly),
    (r"(?i)\s+monthly$", Recurrence::Monthly),
    (r"(?i)\s+every\s+month$", Recurrence::Monthly),
];

fn command_token_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:(?:[!/]\S*|remind)(?:\s+me)?|me)(?:\s+|$)").ok()
    })
    .as_ref()
}

fn suffix_res() -> &'static [(Regex, Recurrence)] {
    static RES: OnceLock<Vec<(Regex, Recurrence)>> = OnceLock::new();
    RES.get_or_init(|| {
        SUFFIXES
            .iter()
            .filter_map(|(pattern, kind)| Regex::new(pattern).ok().map(|re| (re, kind.clone())))
            .collect()
    })
}

fn separator_re(shape: Shape) -> Option<&'static Regex> {
    static TIME_FIRST: OnceLock<Option<Regex>> = OnceLock::new();
    static SUBJECT_FIRST: OnceLock<Option<Regex>> = OnceLock::new();
    match shape {
        Shape::TimeThenSubject => TIME_FIRST
            .get_or_init(|| Regex::new(r"(?i)\s+(?:to|about)\s+").ok())
            .as_ref(),
        Shape::SubjectThenTime => SUBJECT_FIRST
            .get_or_init(|| Regex::new(r"(?i)\s+(?:at|on)\s+").ok())
            .as_ref(),
    }
}

/// Parse a reminder command against the current local time
pub fn parse_command(text: &str) -> Option<ParsedCommand> {
    parse_command_at(text, local_now())
}

/// Parse a reminder command against `now`. `None` means malformed.
pub fn parse_command_at(text: &str, now: NaiveDateTime) -> Option<ParsedCommand> {
    let body = strip_command_token(text.trim());
    let (body, recurrence) = strip_recurrence(body);

    let parsed = [Shape::TimeThenSubject, Shape::SubjectThenTime]
        .into_iter()
        .find_map(|shape| split_on(shape, body, now));

    match parsed {
        Some((subject, instant)) => Some(ParsedCommand {
            text: subject,
            instant,
            recurrence,
        }),
        None => {
            debug!("Rejected reminder command {text:?}");
            None
        }
    }
}

fn strip_command_token(text: &str) -> &str {
    match command_token_re().and_then(|re| re.find(text)) {
        Some(token) => text[token.end()..].trim_start(),
        None => text,
    }
}

fn strip_recurrence(body: &str) -> (&str, Option<Recurrence>) {
    for (re, kind) in suffix_res() {
        if let Some(m) = re.find(body) {
            return (body[..m.start()].trim_end(), Some(kind.clone()));
        }
    }
    (body, None)
}

/// "remind me to call mom at 5pm" leaves "to call mom" as the subject
fn strip_leading_to(subject: &str) -> &str {
    match subject.get(..3) {
        Some(head) if head.eq_ignore_ascii_case("to ") => subject[3..].trim_start(),
        _ => subject,
    }
}

fn split_on(shape: Shape, body: &str, now: NaiveDateTime) -> Option<(String, NaiveDateTime)> {
    let re = separator_re(shape)?;
    re.find_iter(body).find_map(|sep| {
        let left = body[..sep.start()].trim();
        let right = body[sep.end()..].trim();
        let (time_expr, subject) = match shape {
            Shape::TimeThenSubject => (left, right),
            Shape::SubjectThenTime => (right, strip_leading_to(left)),
        };
        if subject.is_empty() {
            return None;
        }
        parse_time_expression(time_expr, now).map(|instant| (subject.to_string(), instant))
    })
}
