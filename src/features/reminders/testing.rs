//! In-memory collaborators for tests

use super::notify::{NotificationSink, OwnerProfile, ProfileLookup};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Mutex;

/// Records every send; optionally fails all of them
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Successful sends so far as `(owner_id, text)`
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, owner_id: &str, text: &str) -> Result<()> {
        if self.fail {
            return Err(anyhow!("transport unavailable"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((owner_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// Knows nobody
pub struct NoProfiles;

#[async_trait]
impl ProfileLookup for NoProfiles {
    async fn get_profile(&self, _owner_id: &str) -> Option<OwnerProfile> {
        None
    }
}
