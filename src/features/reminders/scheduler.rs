//! # Scheduler / Timer Table
//!
//! In-memory table of armed wake-ups, one per `(owner_id, reminder_id)`.
//! Each armed reminder is a sleeping tokio task; on expiry it removes its own
//! table entry and pushes a [`FireEvent`] onto the dispatch channel. A single
//! consumer drains that channel, so fire handling is strictly sequential even
//! though any number of timers can be pending.
//!
//! The table holds no durable state. Losing it (crash, restart) is repaired by
//! the recovery scan over the store.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.1.0: Fire events carry the armed instant
//! - 1.0.0: Initial release

use crate::core::config::PastDuePolicy;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Composite key: (owner_id, reminder_id)
type TimerKey = (String, String);

/// A timer expiry waiting to be handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireEvent {
    pub owner_id: String,
    pub reminder_id: String,
    /// Instant the expiry was armed for; a record due at any other instant
    /// was edited after this event was produced
    pub due_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    /// A wake-up is pending for the due instant
    Armed,
    /// The due instant was not in the future; nothing was armed
    Refused,
    /// Past due, dispatched for immediate handling
    FiredImmediately,
}

struct ArmedTimer {
    due_at: DateTime<Utc>,
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    timers: Arc<DashMap<TimerKey, ArmedTimer>>,
    fire_tx: mpsc::UnboundedSender<FireEvent>,
    generation: AtomicU64,
}

impl Scheduler {
    /// Create an empty timer table and the receiving end of its dispatch channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FireEvent>) {
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            timers: Arc::new(DashMap::new()),
            fire_tx,
            generation: AtomicU64::new(0),
        };
        (scheduler, fire_rx)
    }

    fn make_key(owner_id: &str, reminder_id: &str) -> TimerKey {
        (owner_id.to_string(), reminder_id.to_string())
    }

    /// Arm a one-shot wake-up at `due_at`.
    ///
    /// Refused unless `due_at` is strictly in the future. An existing timer for
    /// the same key is replaced.
    pub fn arm(&self, owner_id: &str, reminder_id: &str, due_at: DateTime<Utc>) -> ArmOutcome {
        let Ok(delay) = due_at.signed_duration_since(Utc::now()).to_std() else {
            return ArmOutcome::Refused;
        };
        if delay.is_zero() {
            return ArmOutcome::Refused;
        }

        let key = Self::make_key(owner_id, reminder_id);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let timers = self.timers.clone();
        let fire_tx = self.fire_tx.clone();

        // Hold the entry while spawning so the task cannot look itself up
        // before it is registered
        let entry = self.timers.entry(key.clone());
        if let Entry::Occupied(existing) = &entry {
            existing.get().handle.abort();
        }

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // Only the timer that is still current for this key may fire
            let current = timers
                .remove_if(&key, |_, armed| armed.generation == generation)
                .is_some();
            if !current {
                return;
            }

            let (owner_id, reminder_id) = key;
            if fire_tx
                .send(FireEvent {
                    owner_id,
                    reminder_id,
                    due_at,
                })
                .is_err()
            {
                warn!("Reminder dispatcher is gone, dropping timer expiry");
            }
        });

        entry.insert(ArmedTimer {
            due_at,
            generation,
            handle,
        });

        debug!("Armed reminder {reminder_id} for {owner_id} at {due_at}");
        ArmOutcome::Armed
    }

    /// Cancel a pending wake-up. No-op if nothing is armed.
    pub fn disarm(&self, owner_id: &str, reminder_id: &str) -> bool {
        match self.timers.remove(&Self::make_key(owner_id, reminder_id)) {
            Some((_, armed)) => {
                armed.handle.abort();
                debug!("Disarmed reminder {reminder_id} for {owner_id}");
                true
            }
            None => false,
        }
    }

    pub fn rearm(&self, owner_id: &str, reminder_id: &str, due_at: DateTime<Utc>) -> ArmOutcome {
        self.disarm(owner_id, reminder_id);
        self.arm(owner_id, reminder_id, due_at)
    }

    /// Arm, applying `policy` when the due instant has already passed
    pub fn arm_with_policy(
        &self,
        owner_id: &str,
        reminder_id: &str,
        due_at: DateTime<Utc>,
        policy: PastDuePolicy,
    ) -> ArmOutcome {
        self.disarm(owner_id, reminder_id);
        match (self.arm(owner_id, reminder_id, due_at), policy) {
            (ArmOutcome::Refused, PastDuePolicy::FireImmediately) => {
                self.fire_now(owner_id, reminder_id, due_at);
                ArmOutcome::FiredImmediately
            }
            (outcome, _) => outcome,
        }
    }

    /// Dispatch a fire event for the record due at `due_at` without waiting
    /// on a timer
    pub fn fire_now(&self, owner_id: &str, reminder_id: &str, due_at: DateTime<Utc>) {
        let event = FireEvent {
            owner_id: owner_id.to_string(),
            reminder_id: reminder_id.to_string(),
            due_at,
        };
        if self.fire_tx.send(event).is_err() {
            warn!("Reminder dispatcher is gone, dropping fire for {reminder_id}");
        }
    }

    /// Due instant of the armed timer for a key, if any
    pub fn armed_at(&self, owner_id: &str, reminder_id: &str) -> Option<DateTime<Utc>> {
        self.timers
            .get(&Self::make_key(owner_id, reminder_id))
            .map(|armed| armed.due_at)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }

    /// Cancel every pending wake-up
    pub fn disarm_all(&self) {
        self.timers.retain(|_, armed| {
            armed.handle.abort();
            false
        });
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.disarm_all();
    }
}
