//! # Reminder Record Store
//!
//! JSON-file persistence for the reminder collection with whole-document
//! load/save. Every access goes through a single process-wide async lock so
//! that read-modify-write cycles never interleave: two reminders firing back
//! to back, or a creation racing a fire, each see the other's write.
//!
//! Writes are plain file overwrites. A crash in the middle of a write can
//! corrupt or lose the last write; a corrupt document is read back as empty.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0

use super::model::{Recurrence, Reminder, ReminderCollection, ReminderRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

pub struct ReminderStore {
    path: PathBuf,
    /// Single-flight queue; tokio's mutex grants the lock in FIFO order
    lock: Mutex<()>,
}

impl ReminderStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the whole collection.
    ///
    /// A missing file is created empty. Unreadable or corrupt files are
    /// logged and treated as an empty collection.
    pub async fn read_all(&self) -> ReminderCollection {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    /// Overwrite the whole collection
    pub async fn write_all(&self, collection: &ReminderCollection) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.save(collection).await
    }

    /// Run one read-modify-write cycle under the single-flight lock.
    ///
    /// If the write fails the error is returned and the on-disk document keeps
    /// its previous contents. A document that could not be read is mutated as
    /// an empty collection, so a successful write after a failed read replaces
    /// everything that was on disk.
    pub async fn mutate<T, F>(&self, apply: F) -> Result<T>
    where
        F: FnOnce(&mut ReminderCollection) -> T,
    {
        let _guard = self.lock.lock().await;
        let mut collection = self.load().await;
        let result = apply(&mut collection);
        self.save(&collection).await?;
        Ok(result)
    }

    /// Insert a new record and return its freshly generated id
    pub async fn insert(
        &self,
        owner_id: &str,
        text: &str,
        due_at: DateTime<Utc>,
        recurrence: Option<Recurrence>,
    ) -> Result<String> {
        let created_at = Utc::now();
        let record = ReminderRecord {
            text: text.to_string(),
            due_at,
            created_at,
            completed: false,
            recurrence,
        };

        self.mutate(|collection| {
            let reminders = collection.entry(owner_id.to_string()).or_default();
            let id = next_id(created_at, |candidate| reminders.contains_key(candidate));
            reminders.insert(id.clone(), record);
            id
        })
        .await
    }

    /// Fetch the current record for `(owner_id, id)`
    pub async fn get(&self, owner_id: &str, id: &str) -> Option<ReminderRecord> {
        self.read_all()
            .await
            .get(owner_id)
            .and_then(|reminders| reminders.get(id))
            .cloned()
    }

    /// Pending reminders for an owner, earliest first
    pub async fn list(&self, owner_id: &str) -> Vec<Reminder> {
        let collection = self.read_all().await;
        let mut reminders: Vec<Reminder> = collection
            .get(owner_id)
            .map(|owned| {
                owned
                    .iter()
                    .filter(|(_, record)| !record.completed)
                    .map(|(id, record)| Reminder::from_record(owner_id, id, record))
                    .collect()
            })
            .unwrap_or_default();

        reminders.sort_by(|a, b| a.due_at.cmp(&b.due_at).then_with(|| a.id.cmp(&b.id)));
        reminders
    }

    /// Remove a record. Returns whether it existed.
    pub async fn remove(&self, owner_id: &str, id: &str) -> Result<bool> {
        self.mutate(|collection| remove_record(collection, owner_id, id).is_some())
            .await
    }

    async fn load(&self) -> ReminderCollection {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    "No reminder store at {}, creating an empty one",
                    self.path.display()
                );
                let empty = ReminderCollection::new();
                if let Err(e) = self.save(&empty).await {
                    error!("Failed to create reminder store: {e:#}");
                }
                return empty;
            }
            Err(e) => {
                error!(
                    "Failed to read reminder store {}: {e}",
                    self.path.display()
                );
                return ReminderCollection::new();
            }
        };

        if content.trim().is_empty() {
            return ReminderCollection::new();
        }

        match serde_json::from_str(&content) {
            Ok(collection) => collection,
            Err(e) => {
                warn!(
                    "Reminder store {} is not valid JSON, treating as empty: {e}",
                    self.path.display()
                );
                ReminderCollection::new()
            }
        }
    }

    async fn save(&self, collection: &ReminderCollection) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(collection)?;
        tokio::fs::write(&self.path, content)
            .await
            .with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }
}

/// Remove a record and drop the owner entry once it is empty
pub(crate) fn remove_record(
    collection: &mut ReminderCollection,
    owner_id: &str,
    id: &str,
) -> Option<ReminderRecord> {
    let reminders = collection.get_mut(owner_id)?;
    let removed = reminders.remove(id);
    if reminders.is_empty() {
        collection.remove(owner_id);
    }
    removed
}

/// Creation timestamp in milliseconds, bumped past any id already taken
fn next_id(created_at: DateTime<Utc>, taken: impl Fn(&str) -> bool) -> String {
    let mut candidate = created_at.timestamp_millis();
    while taken(&candidate.to_string()) {
        candidate += 1;
    }
    candidate.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn store_in(dir: &tempfile::TempDir) -> ReminderStore {
        ReminderStore::new(dir.path().join("reminders.json"))
    }

    #[tokio::test]
    async fn test_read_all_creates_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert!(store.read_all().await.is_empty());
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_creates_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReminderStore::new(dir.path().join("data").join("reminders.json"));

        store
            .insert("owner", "hi", Utc::now() + Duration::hours(1), None)
            .await
            .unwrap();
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_document_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "{ not json").unwrap();

        assert!(store.read_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_insert_get_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let due = Utc.with_ymd_and_hms(2030, 1, 10, 9, 0, 0).unwrap();

        let id = {
            let store = store_in(&dir);
            store
                .insert("chan-1", "stretch", due, Some(Recurrence::Daily))
                .await
                .unwrap()
        };

        // A fresh store over the same file sees the record
        let store = store_in(&dir);
        let record = store.get("chan-1", &id).await.unwrap();
        assert_eq!(record.text, "stretch");
        assert_eq!(record.due_at, due);
        assert!(!record.completed);
        assert_eq!(record.recurrence, Some(Recurrence::Daily));
        assert!(store.get("chan-2", &id).await.is_none());
    }

    #[tokio::test]
    async fn test_ids_are_unique_within_owner() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let due = Utc::now() + Duration::hours(1);

        let mut ids = Vec::new();
        for i in 0..20 {
            ids.push(store.insert("owner", &format!("r{i}"), due, None).await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
    }

    #[test]
    fn test_next_id_skips_taken() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        assert_eq!(next_id(at, |_| false), "1700000000000");
        assert_eq!(
            next_id(at, |c| c == "1700000000000" || c == "1700000000001"),
            "1700000000002"
        );
    }

    #[tokio::test]
    async fn test_list_sorted_and_excludes_completed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let now = Utc::now();

        let late = store.insert("o", "late", now + Duration::hours(3), None).await.unwrap();
        let early = store.insert("o", "early", now + Duration::hours(1), None).await.unwrap();
        let done = store.insert("o", "done", now + Duration::hours(2), None).await.unwrap();
        store.insert("other", "not mine", now, None).await.unwrap();

        store
            .mutate(|c| {
                if let Some(r) = c.get_mut("o").and_then(|o| o.get_mut(&done)) {
                    r.completed = true;
                }
            })
            .await
            .unwrap();

        let listed: Vec<String> = store.list("o").await.into_iter().map(|r| r.id).collect();
        assert_eq!(listed, vec![early, late]);
        assert!(store.list("nobody").await.is_empty());
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let id = store
            .insert("o", "x", Utc::now() + Duration::hours(1), None)
            .await
            .unwrap();

        assert!(store.remove("o", &id).await.unwrap());
        assert!(!store.remove("o", &id).await.unwrap());
        assert!(store.get("o", &id).await.is_none());
        // Empty owner entries are dropped from the document
        assert!(store.read_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_mutations_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store_in(&dir));
        let due = Utc::now() + Duration::hours(1);

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert("o", &format!("r{i}"), due, None).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.list("o").await.len(), 16);
    }

    #[tokio::test]
    async fn test_write_after_unreadable_document_replaces_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "{ not json").unwrap();

        let id = store
            .insert("o", "fresh", Utc::now() + Duration::hours(1), None)
            .await
            .unwrap();

        let collection = store.read_all().await;
        assert_eq!(collection.len(), 1);
        assert_eq!(collection["o"].len(), 1);
        assert_eq!(collection["o"][&id].text, "fresh");
    }

    #[tokio::test]
    async fn test_failed_write_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // The store path is a directory, so writes fail
        let store = ReminderStore::new(dir.path());

        let result = store
            .insert("o", "x", Utc::now() + Duration::hours(1), None)
            .await;
        assert!(result.is_err());
        assert!(store.read_all().await.is_empty());
    }
}
