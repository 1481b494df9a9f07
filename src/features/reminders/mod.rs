//! # Reminders Feature
//!
//! Free-text reminders with optional daily/weekly/monthly recurrence,
//! persisted to a JSON document and armed as in-process timers.
//!
//! - **Version**: 2.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: true
//!
//! ## Changelog
//! - 2.0.0: Natural-language times, recurrence rollover, JSON store with startup recovery
//! - 1.0.0: Initial release with relative-duration reminders

pub mod command;
pub mod controller;
pub mod format;
pub mod model;
pub mod notify;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod time_parser;

#[cfg(test)]
pub(crate) mod testing;

pub use command::{parse_command, parse_command_at, ParsedCommand};
pub use controller::{FireController, FireOutcome};
pub use model::{Recurrence, Reminder, ReminderCollection, ReminderRecord};
pub use notify::{AnyOwner, NotificationSink, OwnerProfile, ProfileLookup};
pub use scheduler::{ArmOutcome, FireEvent, Scheduler};
pub use service::{RecoveryReport, ReminderService};
pub use store::ReminderStore;
pub use time_parser::{local_to_utc, parse_time_expression};
