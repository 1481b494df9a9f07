//! # Features
//!
//! Feature modules and the registry used for startup reporting.

pub mod reminders;

pub use reminders::{ReminderService, ReminderStore};

/// Name and version of a feature module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub since: &'static str,
    pub toggleable: bool,
}

/// Crate version from Cargo.toml
pub fn get_bot_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// All registered features
pub fn get_features() -> Vec<FeatureInfo> {
    vec![FeatureInfo {
        name: "reminders",
        version: "2.0.0",
        since: "0.1.0",
        toggleable: true,
    }]
}
