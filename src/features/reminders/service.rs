//! # Reminder Service
//!
//! The one object a process builds to run reminders. It owns the timer table
//! and a handle to the store, exposes the creation/query/removal API, runs
//! the startup recovery scan, and drains timer expiries into the
//! fire-and-recur controller one at a time.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.1.0: Manual reschedule and configurable past-due handling
//! - 1.0.0: Initial release

use super::command::{parse_command, ParsedCommand};
use super::controller::{FireController, FireOutcome};
use super::model::{Recurrence, Reminder};
use super::notify::{NotificationSink, ProfileLookup};
use super::scheduler::{ArmOutcome, FireEvent, Scheduler};
use super::store::ReminderStore;
use super::time_parser::local_to_utc;
use crate::core::config::PastDuePolicy;
use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Counts from one recovery scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub armed: usize,
    /// Past due and dropped under [`PastDuePolicy::Skip`]
    pub skipped: usize,
    /// Past due and dispatched under [`PastDuePolicy::FireImmediately`]
    pub fired: usize,
    /// Completed leftovers that were not armed
    pub completed: usize,
}

pub struct ReminderService {
    store: Arc<ReminderStore>,
    scheduler: Arc<Scheduler>,
    controller: FireController,
    past_due: PastDuePolicy,
    fire_rx: Mutex<Option<mpsc::UnboundedReceiver<FireEvent>>>,
}

impl ReminderService {
    pub fn new(
        store: ReminderStore,
        sink: Arc<dyn NotificationSink>,
        profiles: Arc<dyn ProfileLookup>,
        past_due: PastDuePolicy,
    ) -> Self {
        let store = Arc::new(store);
        let (scheduler, fire_rx) = Scheduler::new();
        let scheduler = Arc::new(scheduler);
        let controller =
            FireController::new(store.clone(), scheduler.clone(), sink, profiles, past_due);

        Self {
            store,
            scheduler,
            controller,
            past_due,
            fire_rx: Mutex::new(Some(fire_rx)),
        }
    }

    pub fn store(&self) -> &ReminderStore {
        &self.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Persist a new reminder and arm it. Returns the new id.
    pub async fn create_reminder(
        &self,
        owner_id: &str,
        text: &str,
        due_at: DateTime<Utc>,
        recurrence: Option<Recurrence>,
    ) -> Result<String> {
        if text.trim().is_empty() {
            bail!("Reminder text must not be empty");
        }
        if due_at <= Utc::now() {
            bail!("Reminder time {due_at} is not in the future");
        }

        let id = self
            .store
            .insert(owner_id, text.trim(), due_at, recurrence)
            .await?;

        if self.scheduler.arm(owner_id, &id, due_at) == ArmOutcome::Refused {
            // The instant passed while the write was in flight
            warn!("Reminder {id} became due before it could be armed, firing now");
            self.scheduler.fire_now(owner_id, &id, due_at);
        }

        info!("Created reminder {id} for {owner_id} at {due_at}");
        Ok(id)
    }

    /// Parse a free-text command and create the reminder it describes.
    ///
    /// `Ok(None)` means the command was malformed.
    pub async fn create_from_command(
        &self,
        owner_id: &str,
        command: &str,
    ) -> Result<Option<Reminder>> {
        let Some(ParsedCommand {
            text,
            instant,
            recurrence,
        }) = parse_command(command)
        else {
            return Ok(None);
        };

        let due_at = local_to_utc(instant)
            .ok_or_else(|| anyhow!("{instant} does not exist in the local timezone"))?;
        let id = self
            .create_reminder(owner_id, &text, due_at, recurrence)
            .await?;

        Ok(self
            .store
            .get(owner_id, &id)
            .await
            .map(|record| Reminder::from_record(owner_id, &id, &record)))
    }

    /// Pending reminders for an owner, earliest first
    pub async fn list_reminders(&self, owner_id: &str) -> Vec<Reminder> {
        self.store.list(owner_id).await
    }

    /// Remove a reminder and cancel its timer. Returns whether it existed.
    pub async fn delete_reminder(&self, owner_id: &str, reminder_id: &str) -> Result<bool> {
        let removed = self.store.remove(owner_id, reminder_id).await?;
        self.scheduler.disarm(owner_id, reminder_id);
        if removed {
            info!("Deleted reminder {reminder_id} for {owner_id}");
        }
        Ok(removed)
    }

    /// Move a reminder to a new instant. Returns whether it existed.
    pub async fn reschedule_reminder(
        &self,
        owner_id: &str,
        reminder_id: &str,
        due_at: DateTime<Utc>,
    ) -> Result<bool> {
        if due_at <= Utc::now() {
            bail!("Reminder time {due_at} is not in the future");
        }

        let updated = self
            .store
            .mutate(|collection| {
                match collection
                    .get_mut(owner_id)
                    .and_then(|owned| owned.get_mut(reminder_id))
                {
                    Some(record) => {
                        record.due_at = due_at;
                        true
                    }
                    None => false,
                }
            })
            .await?;

        if updated {
            self.scheduler
                .arm_with_policy(owner_id, reminder_id, due_at, self.past_due);
            info!("Rescheduled reminder {reminder_id} for {owner_id} to {due_at}");
        }
        Ok(updated)
    }

    /// Arm every pending record in the store. Run once at startup.
    pub async fn recover(&self) -> RecoveryReport {
        let collection = self.store.read_all().await;
        let mut report = RecoveryReport::default();

        for (owner_id, reminders) in &collection {
            for (reminder_id, record) in reminders {
                if record.completed {
                    report.completed += 1;
                    continue;
                }
                match self.scheduler.arm_with_policy(
                    owner_id,
                    reminder_id,
                    record.due_at,
                    self.past_due,
                ) {
                    ArmOutcome::Armed => report.armed += 1,
                    ArmOutcome::Refused => {
                        debug!("Skipping past-due reminder {reminder_id} for {owner_id}");
                        report.skipped += 1;
                    }
                    ArmOutcome::FiredImmediately => report.fired += 1,
                }
            }
        }

        info!(
            "Recovered reminders: {} armed, {} past due skipped, {} past due fired",
            report.armed, report.skipped, report.fired
        );
        report
    }

    /// Handle a single timer expiry
    pub async fn handle_fire(&self, event: &FireEvent) -> FireOutcome {
        self.controller
            .fire(&event.owner_id, &event.reminder_id, event.due_at)
            .await
    }

    /// Drain timer expiries until the service is dropped.
    ///
    /// Expiries are handled strictly one after another. Only the first call
    /// runs; later calls return immediately.
    pub async fn run(self: Arc<Self>) {
        let Some(mut fire_rx) = self.fire_rx.lock().await.take() else {
            warn!("Reminder dispatcher is already running");
            return;
        };

        info!("⏰ Reminder dispatcher started");
        while let Some(event) = fire_rx.recv().await {
            let outcome = self.handle_fire(&event).await;
            debug!(
                "Fired reminder {} for {}: {outcome:?}",
                event.reminder_id, event.owner_id
            );
        }
        info!("Reminder dispatcher stopped");
    }

    /// Cancel every pending timer. Stored reminders are untouched.
    pub fn shutdown(&self) {
        self.scheduler.disarm_all();
    }
}
