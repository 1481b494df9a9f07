//! # Core Module
//!
//! Configuration shared by the library and the bot binary.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false

pub mod config;

// Re-export commonly used items
pub use config::{Config, PastDuePolicy};
