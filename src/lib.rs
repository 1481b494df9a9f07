// Core layer - configuration
pub mod core;

// Features layer - reminder engine
pub mod features;

pub use crate::core::{Config, PastDuePolicy};

pub use features::reminders::{
    parse_command, parse_time_expression, NotificationSink, OwnerProfile, ProfileLookup,
    Recurrence, Reminder, ReminderService, ReminderStore,
};
