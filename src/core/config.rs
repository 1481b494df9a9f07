//! Environment-driven configuration for the bot binary.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::str::FromStr;

/// What to do with a reminder whose due instant has already passed when it
/// is about to be armed (startup recovery or a late recurrence rollover).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PastDuePolicy {
    /// Leave the record on disk and arm nothing
    #[default]
    Skip,
    /// Dispatch a fire event right away
    FireImmediately,
}

impl std::fmt::Display for PastDuePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PastDuePolicy::Skip => write!(f, "skip"),
            PastDuePolicy::FireImmediately => write!(f, "fire"),
        }
    }
}

impl FromStr for PastDuePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(PastDuePolicy::Skip),
            "fire" | "fire_immediately" => Ok(PastDuePolicy::FireImmediately),
            _ => Err(anyhow!("Invalid past-due policy: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub reminders_path: PathBuf,
    pub log_level: String,
    pub command_prefix: String,
    pub past_due_policy: PastDuePolicy,
}

impl Config {
    /// Build the config from process environment (call `dotenvy::dotenv()` first)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let discord_token = lookup("DISCORD_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| anyhow!("DISCORD_TOKEN must be set"))?;

        let reminders_path = lookup("REMINDERS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("reminders.json"));

        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let command_prefix = lookup("COMMAND_PREFIX").unwrap_or_else(|| "!".to_string());
        if command_prefix.trim().is_empty() {
            return Err(anyhow!("COMMAND_PREFIX must not be empty"));
        }

        let past_due_policy = match lookup("PAST_DUE_POLICY") {
            Some(raw) => raw.parse()?,
            None => PastDuePolicy::default(),
        };

        Ok(Config {
            discord_token,
            reminders_path,
            log_level,
            command_prefix,
            past_due_policy,
        })
    }
}
