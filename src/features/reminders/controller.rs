//! # Fire-and-Recur Controller
//!
//! Handles one timer expiry at a time:
//!
//! 1. reload the record from the store (never trust the copy from arm time),
//! 2. stop quietly if it is gone, or if its due instant is no longer the one
//!    the expiry was armed for (a snooze or edit landed in between),
//! 3. deliver the current text through the notification sink,
//! 4. delete one-shot reminders, or advance recurring ones by their period
//!    and re-arm them.
//!
//! Delivery is best effort. A failed send is logged and the reminder still
//! advances or gets deleted, so a transport outage cannot stall a recurrence
//! chain.
//!
//! Under [`PastDuePolicy::FireImmediately`] a late recurring reminder is
//! delivered once and then skipped forward past every missed period.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.1.0: Ignore expiries for rescheduled records; single catch-up for late recurring reminders
//! - 1.0.0: Initial release

use super::model::{Recurrence, ReminderCollection};
use super::notify::{format_notification, NotificationSink, ProfileLookup};
use super::scheduler::{ArmOutcome, Scheduler};
use super::store::{remove_record, ReminderStore};
use crate::core::config::PastDuePolicy;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;

/// What a single fire did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// The record vanished, completed or was rescheduled between arm and fire
    Stale,
    /// No profile for the owner; nothing was delivered or changed
    NoProfile,
    /// One-shot (or unrecognized recurrence) reminder removed from the store
    Deleted { delivered: bool },
    /// Recurring reminder advanced to `next_due`
    Rescheduled {
        next_due: DateTime<Utc>,
        arm: ArmOutcome,
        delivered: bool,
    },
    /// The rollover could not be persisted; the timer table was left alone
    PersistFailed,
}

enum Settled {
    Vanished,
    /// Rescheduled while the notification was being delivered
    Moved,
    Deleted,
    Advanced(DateTime<Utc>),
}

pub struct FireController {
    store: Arc<ReminderStore>,
    scheduler: Arc<Scheduler>,
    sink: Arc<dyn NotificationSink>,
    profiles: Arc<dyn ProfileLookup>,
    past_due: PastDuePolicy,
}

impl FireController {
    pub fn new(
        store: Arc<ReminderStore>,
        scheduler: Arc<Scheduler>,
        sink: Arc<dyn NotificationSink>,
        profiles: Arc<dyn ProfileLookup>,
        past_due: PastDuePolicy,
    ) -> Self {
        Self {
            store,
            scheduler,
            sink,
            profiles,
            past_due,
        }
    }

    /// Handle the expiry armed for `(owner_id, reminder_id)` at `armed_for`
    pub async fn fire(
        &self,
        owner_id: &str,
        reminder_id: &str,
        armed_for: DateTime<Utc>,
    ) -> FireOutcome {
        let Some(record) = self.store.get(owner_id, reminder_id).await else {
            debug!("Reminder {reminder_id} for {owner_id} no longer exists, skipping fire");
            return FireOutcome::Stale;
        };
        if record.completed {
            debug!("Reminder {reminder_id} for {owner_id} already completed, skipping fire");
            return FireOutcome::Stale;
        }
        if record.due_at != armed_for {
            debug!(
                "Reminder {reminder_id} for {owner_id} moved to {} since it was armed for {armed_for}, skipping fire",
                record.due_at
            );
            return FireOutcome::Stale;
        }

        let Some(profile) = self.profiles.get_profile(owner_id).await else {
            info!("No profile for owner {owner_id}, skipping reminder {reminder_id}");
            return FireOutcome::NoProfile;
        };

        let message = format_notification(&profile, &record.text);
        let delivered = match self.sink.send(owner_id, &message).await {
            Ok(()) => {
                info!("Delivered reminder {reminder_id} to {owner_id}");
                true
            }
            Err(e) => {
                warn!("Failed to deliver reminder {reminder_id} to {owner_id}: {e:#}");
                false
            }
        };

        if let Some(kind) = record.recurrence.as_ref().filter(|k| !k.is_recognized()) {
            warn!("Reminder {reminder_id} has unrecognized recurrence {kind:?}, treating as one-shot");
        }

        let catch_up = match self.past_due {
            PastDuePolicy::FireImmediately => Some(Utc::now()),
            PastDuePolicy::Skip => None,
        };
        let settled = self
            .store
            .mutate(|collection| settle(collection, owner_id, reminder_id, armed_for, catch_up))
            .await;

        match settled {
            Err(e) => {
                error!("Failed to persist fired reminder {reminder_id} for {owner_id}: {e:#}");
                FireOutcome::PersistFailed
            }
            Ok(Settled::Vanished) => {
                debug!("Reminder {reminder_id} was removed while being delivered");
                self.scheduler.disarm(owner_id, reminder_id);
                FireOutcome::Stale
            }
            Ok(Settled::Moved) => {
                debug!("Reminder {reminder_id} was rescheduled while being delivered");
                FireOutcome::Stale
            }
            Ok(Settled::Deleted) => {
                self.scheduler.disarm(owner_id, reminder_id);
                FireOutcome::Deleted { delivered }
            }
            Ok(Settled::Advanced(next_due)) => {
                let arm =
                    self.scheduler
                        .arm_with_policy(owner_id, reminder_id, next_due, self.past_due);
                if arm == ArmOutcome::Refused {
                    warn!(
                        "Next occurrence of reminder {reminder_id} ({next_due}) is already past, not armed"
                    );
                } else {
                    debug!("Reminder {reminder_id} rolled over to {next_due}");
                }
                FireOutcome::Rescheduled {
                    next_due,
                    arm,
                    delivered,
                }
            }
        }
    }
}

/// Advance or delete the fired record as it is stored right now.
///
/// With `catch_up`, a recurring record keeps advancing until its next
/// occurrence is after that instant.
fn settle(
    collection: &mut ReminderCollection,
    owner_id: &str,
    reminder_id: &str,
    armed_for: DateTime<Utc>,
    catch_up: Option<DateTime<Utc>>,
) -> Settled {
    let next_due = match collection.get(owner_id).and_then(|r| r.get(reminder_id)) {
        Some(record) if record.due_at != armed_for => return Settled::Moved,
        Some(record) => record
            .recurrence
            .as_ref()
            .and_then(|kind| next_occurrence(kind, record.due_at, catch_up)),
        None => return Settled::Vanished,
    };

    match next_due {
        Some(next_due) => {
            if let Some(record) = collection
                .get_mut(owner_id)
                .and_then(|r| r.get_mut(reminder_id))
            {
                record.due_at = next_due;
            }
            Settled::Advanced(next_due)
        }
        None => {
            remove_record(collection, owner_id, reminder_id);
            Settled::Deleted
        }
    }
}

fn next_occurrence(
    kind: &Recurrence,
    due_at: DateTime<Utc>,
    catch_up: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let mut next = kind.advance(due_at)?;
    if let Some(now) = catch_up {
        while next <= now {
            match kind.advance(next) {
                Some(later) => next = later,
                None => break,
            }
        }
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::reminders::model::{Recurrence, ReminderRecord};
    use crate::features::reminders::notify::AnyOwner;
    use crate::features::reminders::testing::{NoProfiles, RecordingSink};
    use chrono::{Duration, TimeZone};

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<ReminderStore>,
        scheduler: Arc<Scheduler>,
        sink: Arc<RecordingSink>,
    }

    impl Harness {
        fn new(sink: RecordingSink) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(ReminderStore::new(dir.path().join("reminders.json")));
            let (scheduler, _rx) = Scheduler::new();
            Self {
                _dir: dir,
                store,
                scheduler: Arc::new(scheduler),
                sink: Arc::new(sink),
            }
        }

        fn controller(&self) -> FireController {
            self.controller_with(PastDuePolicy::Skip)
        }

        fn controller_with(&self, past_due: PastDuePolicy) -> FireController {
            FireController::new(
                self.store.clone(),
                self.scheduler.clone(),
                self.sink.clone(),
                Arc::new(AnyOwner),
                past_due,
            )
        }

        async fn put(&self, owner: &str, id: &str, due_at: DateTime<Utc>, recurrence: Option<Recurrence>) {
            let record = ReminderRecord {
                text: format!("text {id}"),
                due_at,
                created_at: due_at - Duration::days(1),
                completed: false,
                recurrence,
            };
            self.store
                .mutate(|c| {
                    c.entry(owner.to_string())
                        .or_default()
                        .insert(id.to_string(), record);
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_one_shot_is_deleted_after_delivery() {
        let h = Harness::new(RecordingSink::default());
        let due = Utc::now() + Duration::minutes(1);
        h.put("o", "1", due, None).await;
        h.scheduler.arm("o", "1", due);

        let outcome = h.controller().fire("o", "1", due).await;

        assert_eq!(outcome, FireOutcome::Deleted { delivered: true });
        assert!(h.store.get("o", "1").await.is_none());
        assert!(h.store.read_all().await.is_empty());
        assert_eq!(h.scheduler.armed_at("o", "1"), None);
        assert_eq!(h.sink.sent(), vec![("o".to_string(), "⏰ Reminder: text 1".to_string())]);
    }

    #[tokio::test]
    async fn test_daily_rollover_from_due_instant() {
        let h = Harness::new(RecordingSink::default());
        let due = Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap();
        h.put("o", "1", due, Some(Recurrence::Daily)).await;
        h.put("o", "2", due + Duration::hours(1), None).await;

        let outcome = h.controller().fire("o", "1", due).await;

        let next = Utc.with_ymd_and_hms(2024, 1, 11, 9, 0, 0).unwrap();
        assert_eq!(
            outcome,
            FireOutcome::Rescheduled {
                next_due: next,
                // 2024 is long gone, so the new instant cannot be armed
                arm: ArmOutcome::Refused,
                delivered: true,
            }
        );
        assert_eq!(h.store.get("o", "1").await.unwrap().due_at, next);
        assert_eq!(h.store.read_all().await["o"].len(), 2);
    }

    #[tokio::test]
    async fn test_recurring_rollover_rearms_future_instant() {
        let h = Harness::new(RecordingSink::default());
        let due = Utc::now() + Duration::minutes(10);
        h.put("o", "w", due, Some(Recurrence::Weekly)).await;
        h.scheduler.arm("o", "w", due);

        let outcome = h.controller().fire("o", "w", due).await;

        let next = due + Duration::days(7);
        assert_eq!(
            outcome,
            FireOutcome::Rescheduled {
                next_due: next,
                arm: ArmOutcome::Armed,
                delivered: true,
            }
        );
        assert_eq!(h.scheduler.armed_at("o", "w"), Some(next));
        assert_eq!(h.scheduler.armed_count(), 1);
        assert_eq!(h.store.get("o", "w").await.unwrap().due_at, next);
    }

    #[tokio::test]
    async fn test_stale_fire_is_a_no_op() {
        let h = Harness::new(RecordingSink::default());

        assert_eq!(
            h.controller().fire("o", "missing", Utc::now()).await,
            FireOutcome::Stale
        );
        assert!(h.sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_delivers_current_text() {
        let h = Harness::new(RecordingSink::default());
        let due = Utc::now() + Duration::minutes(1);
        h.put("o", "1", due, None).await;
        h.store
            .mutate(|c| {
                if let Some(r) = c.get_mut("o").and_then(|o| o.get_mut("1")) {
                    r.text = "edited".to_string();
                }
            })
            .await
            .unwrap();

        h.controller().fire("o", "1", due).await;
        assert_eq!(h.sink.sent()[0].1, "⏰ Reminder: edited");
    }

    #[tokio::test]
    async fn test_delivery_failure_still_advances() {
        let h = Harness::new(RecordingSink::failing());
        let due = Utc::now() + Duration::minutes(1);
        h.put("o", "d", due, Some(Recurrence::Daily)).await;
        h.put("o", "n", due, None).await;

        let controller = h.controller();
        let recurring = controller.fire("o", "d", due).await;
        let one_shot = controller.fire("o", "n", due).await;

        assert!(matches!(
            recurring,
            FireOutcome::Rescheduled { delivered: false, .. }
        ));
        assert_eq!(one_shot, FireOutcome::Deleted { delivered: false });
        assert_eq!(
            h.store.get("o", "d").await.unwrap().due_at,
            due + Duration::days(1)
        );
        assert!(h.store.get("o", "n").await.is_none());
    }

    #[tokio::test]
    async fn test_unrecognized_recurrence_is_terminal() {
        let h = Harness::new(RecordingSink::default());
        let due = Utc::now() + Duration::minutes(1);
        h.put("o", "1", due, Some(Recurrence::Unrecognized("hourly".to_string())))
            .await;

        let outcome = h.controller().fire("o", "1", due).await;

        assert_eq!(outcome, FireOutcome::Deleted { delivered: true });
        assert!(h.store.get("o", "1").await.is_none());
    }

    #[tokio::test]
    async fn test_missing_profile_skips_fire() {
        let h = Harness::new(RecordingSink::default());
        let due = Utc::now() + Duration::minutes(1);
        h.put("o", "1", due, None).await;

        let controller = FireController::new(
            h.store.clone(),
            h.scheduler.clone(),
            h.sink.clone(),
            Arc::new(NoProfiles),
            PastDuePolicy::Skip,
        );

        assert_eq!(controller.fire("o", "1", due).await, FireOutcome::NoProfile);
        assert!(h.sink.sent().is_empty());
        assert_eq!(h.store.get("o", "1").await.unwrap().due_at, due);
    }

    #[tokio::test]
    async fn test_rescheduled_record_ignores_old_expiry() {
        let h = Harness::new(RecordingSink::default());
        let armed_for = Utc::now() + Duration::hours(1);
        let snoozed = Utc::now() + Duration::hours(5);
        h.put("o", "1", snoozed, None).await;
        h.scheduler.arm("o", "1", snoozed);

        let outcome = h.controller().fire("o", "1", armed_for).await;

        assert_eq!(outcome, FireOutcome::Stale);
        assert!(h.sink.sent().is_empty());
        assert_eq!(h.store.get("o", "1").await.unwrap().due_at, snoozed);
        assert_eq!(h.scheduler.armed_at("o", "1"), Some(snoozed));
    }

    #[tokio::test]
    async fn test_late_recurring_catches_up_once() {
        let h = Harness::new(RecordingSink::default());
        let due = Utc::now() - Duration::days(5) + Duration::minutes(1);
        h.put("o", "1", due, Some(Recurrence::Daily)).await;

        let outcome = h
            .controller_with(PastDuePolicy::FireImmediately)
            .fire("o", "1", due)
            .await;

        let next = due + Duration::days(5);
        assert_eq!(
            outcome,
            FireOutcome::Rescheduled {
                next_due: next,
                arm: ArmOutcome::Armed,
                delivered: true,
            }
        );
        assert_eq!(h.sink.sent().len(), 1);
        assert_eq!(h.store.get("o", "1").await.unwrap().due_at, next);
        assert_eq!(h.scheduler.armed_at("o", "1"), Some(next));
    }

    #[test]
    fn test_next_occurrence_skips_missed_periods() {
        let due = Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 20, 12, 0, 0).unwrap();

        assert_eq!(
            next_occurrence(&Recurrence::Daily, due, None),
            Some(Utc.with_ymd_and_hms(2024, 1, 11, 9, 0, 0).unwrap())
        );
        assert_eq!(
            next_occurrence(&Recurrence::Daily, due, Some(now)),
            Some(Utc.with_ymd_and_hms(2024, 1, 21, 9, 0, 0).unwrap())
        );
        assert_eq!(
            next_occurrence(&Recurrence::Weekly, due, Some(now)),
            Some(Utc.with_ymd_and_hms(2024, 1, 24, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_settle_monthly() {
        let jan_31 = Utc.with_ymd_and_hms(2024, 1, 31, 8, 0, 0).unwrap();
        let mut collection = ReminderCollection::new();
        collection.entry("o".to_string()).or_default().insert(
            "1".to_string(),
            ReminderRecord {
                text: "rent".to_string(),
                due_at: jan_31,
                created_at: Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap(),
                completed: false,
                recurrence: Some(Recurrence::Monthly),
            },
        );

        match settle(&mut collection, "o", "1", jan_31, None) {
            Settled::Advanced(next) => {
                assert_eq!(next, Utc.with_ymd_and_hms(2024, 2, 29, 8, 0, 0).unwrap())
            }
            _ => panic!("monthly reminder should advance"),
        }
        assert!(matches!(
            settle(&mut collection, "o", "2", jan_31, None),
            Settled::Vanished
        ));
    }

    #[test]
    fn test_settle_leaves_moved_record_alone() {
        let armed_for = Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap();
        let snoozed = armed_for + Duration::hours(2);
        let mut collection = ReminderCollection::new();
        collection.entry("o".to_string()).or_default().insert(
            "1".to_string(),
            ReminderRecord {
                text: "x".to_string(),
                due_at: snoozed,
                created_at: armed_for - Duration::days(1),
                completed: false,
                recurrence: None,
            },
        );

        assert!(matches!(
            settle(&mut collection, "o", "1", armed_for, None),
            Settled::Moved
        ));
        assert_eq!(collection["o"]["1"].due_at, snoozed);
    }
}
