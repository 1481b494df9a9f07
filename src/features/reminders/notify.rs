//! Collaborators the reminder engine consumes: a place to deliver text and a
//! way to look up who an owner is.

use anyhow::Result;
use async_trait::async_trait;

/// Delivers reminder text to an owner (a channel or DM)
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, owner_id: &str, text: &str) -> Result<()>;
}

/// What the engine knows about an owner at fire time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerProfile {
    pub owner_id: String,
    pub display_name: Option<String>,
}

/// Resolves owners to profiles. An absent profile means "do not deliver".
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn get_profile(&self, owner_id: &str) -> Option<OwnerProfile>;
}

/// Treats every owner as known, without a display name
pub struct AnyOwner;

#[async_trait]
impl ProfileLookup for AnyOwner {
    async fn get_profile(&self, owner_id: &str) -> Option<OwnerProfile> {
        Some(OwnerProfile {
            owner_id: owner_id.to_string(),
            display_name: None,
        })
    }
}

/// Text delivered for a fired reminder
pub fn format_notification(profile: &OwnerProfile, text: &str) -> String {
    match profile.display_name.as_deref().filter(|n| !n.trim().is_empty()) {
        Some(name) => format!("⏰ Reminder for {name}: {text}"),
        None => format!("⏰ Reminder: {text}"),
    }
}
