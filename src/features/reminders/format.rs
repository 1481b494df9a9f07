//! Human-readable rendering of reminders for chat replies

use super::model::Reminder;
use chrono::{DateTime, Local, Utc};

/// Discord message content limit
pub const MESSAGE_LIMIT: usize = 2000;

/// Format a duration in seconds into a human-readable string
pub fn format_duration(seconds: i64) -> String {
    fn unit(n: i64, name: &str) -> String {
        format!("{} {}{}", n, name, if n == 1 { "" } else { "s" })
    }

    if seconds < 60 {
        unit(seconds, "second")
    } else if seconds < 3600 {
        unit(seconds / 60, "minute")
    } else if seconds < 86400 {
        let hours = seconds / 3600;
        let mins = (seconds % 3600) / 60;
        if mins > 0 {
            format!("{} {}", unit(hours, "hour"), unit(mins, "minute"))
        } else {
            unit(hours, "hour")
        }
    } else {
        let days = seconds / 86400;
        let hours = (seconds % 86400) / 3600;
        if hours > 0 {
            format!("{} {}", unit(days, "day"), unit(hours, "hour"))
        } else {
            unit(days, "day")
        }
    }
}

/// Relative description of `due_at` as seen from `now`
pub fn format_relative(due_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = due_at.signed_duration_since(now).num_seconds();
    if diff > 0 {
        format!("in {}", format_duration(diff))
    } else {
        "any moment now".to_string()
    }
}

/// One listing entry: id, relative time, local wall-clock time, recurrence, text
pub fn format_reminder_line(reminder: &Reminder, now: DateTime<Utc>) -> String {
    let local = reminder
        .due_at
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M");
    let repeat = reminder
        .recurrence
        .as_ref()
        .map(|kind| format!(" 🔁 {kind}"))
        .unwrap_or_default();

    format!(
        "**#{}** - {} ({local}){repeat}\n> {}",
        reminder.id,
        format_relative(reminder.due_at, now),
        reminder.text
    )
}

/// Render a reminder listing, split into messages that fit `max_size`.
///
/// Entries are never split across messages.
pub fn format_reminder_list(reminders: &[Reminder], now: DateTime<Utc>, max_size: usize) -> Vec<String> {
    if reminders.is_empty() {
        return vec![
            "📋 You don't have any pending reminders.\n\nUse `remind in 2 hours to stretch` to create one!"
                .to_string(),
        ];
    }

    let mut messages = Vec::new();
    let mut current = String::from("📋 **Your Pending Reminders:**\n\n");

    for reminder in reminders {
        let entry = format!("{}\n\n", format_reminder_line(reminder, now));
        if current.len() + entry.len() > max_size && !current.trim().is_empty() {
            messages.push(current.trim_end().to_string());
            current = String::new();
        }
        current.push_str(&entry);
    }
    if !current.trim().is_empty() {
        messages.push(current.trim_end().to_string());
    }
    messages
}
