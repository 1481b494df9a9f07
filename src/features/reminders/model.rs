//! Reminder records and the persisted document layout
//!
//! The on-disk document is a JSON object mapping owner ids to objects that
//! map reminder ids to [`ReminderRecord`]s. Field names are camelCase and
//! instants are ISO-8601 strings, so the layout stays stable across restarts.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Recurrence of a reminder. `None` at the call sites means "fires once".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Recurrence {
    Daily,
    Weekly,
    Monthly,
    /// A value this build does not know how to roll over; fired as terminal
    Unrecognized(String),
}

impl Recurrence {
    /// Advance `due_at` by one period.
    ///
    /// Monthly keeps the day of month, clamping to the last day of shorter
    /// months (Jan 31 -> Feb 29 in a leap year). Returns `None` for
    /// unrecognized values or on calendar overflow.
    pub fn advance(&self, due_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Recurrence::Daily => due_at.checked_add_signed(Duration::days(1)),
            Recurrence::Weekly => due_at.checked_add_signed(Duration::days(7)),
            Recurrence::Monthly => due_at.checked_add_months(Months::new(1)),
            Recurrence::Unrecognized(_) => None,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Recurrence::Unrecognized(_))
    }
}

impl std::fmt::Display for Recurrence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recurrence::Daily => write!(f, "daily"),
            Recurrence::Weekly => write!(f, "weekly"),
            Recurrence::Monthly => write!(f, "monthly"),
            Recurrence::Unrecognized(raw) => write!(f, "{raw}"),
        }
    }
}

impl From<String> for Recurrence {
    fn from(raw: String) -> Self {
        match raw.to_lowercase().as_str() {
            "daily" => Recurrence::Daily,
            "weekly" => Recurrence::Weekly,
            "monthly" => Recurrence::Monthly,
            _ => Recurrence::Unrecognized(raw),
        }
    }
}

impl From<Recurrence> for String {
    fn from(recurrence: Recurrence) -> Self {
        recurrence.to_string()
    }
}

/// A persisted reminder, keyed externally by `(owner_id, id)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderRecord {
    pub text: String,
    pub due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Transient marker for fired one-shot reminders awaiting deletion
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
}

/// A reminder together with its keys, as handed to callers
#[derive(Debug, Clone, PartialEq)]
pub struct Reminder {
    pub id: String,
    pub owner_id: String,
    pub text: String,
    pub due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub completed: bool,
    pub recurrence: Option<Recurrence>,
}

impl Reminder {
    pub fn from_record(owner_id: &str, id: &str, record: &ReminderRecord) -> Self {
        Self {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            text: record.text.clone(),
            due_at: record.due_at,
            created_at: record.created_at,
            completed: record.completed,
            recurrence: record.recurrence.clone(),
        }
    }
}

/// owner id -> reminder id -> record
pub type OwnerReminders = BTreeMap<String, ReminderRecord>;

/// The whole persisted document
pub type ReminderCollection = BTreeMap<String, OwnerReminders>;
