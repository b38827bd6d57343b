//! Local storage backend: a string map persisted as one JSON file.
//!
//! The whole map is rewritten on each change, the same way the planner's
//! browser build leaned on `localStorage`. Handles created with
//! [`LocalStorage::new_handle`] share the map and its change channel.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{HandleId, PlanStorage, StorageEvent, StorageEvents};

const STORAGE_FILE_NAME: &str = "local_storage.json";
const EVENT_CAPACITY: usize = 64;

struct Shared {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
    next_handle: AtomicU64,
}

pub struct LocalStorage {
    shared: Arc<Shared>,
    handle_id: HandleId,
}

impl LocalStorage {
    /// Storage that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::from_entries(None, BTreeMap::new())
    }

    /// Open (or start) the storage file at `path`. A corrupt file is logged
    /// and replaced by an empty map on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("Local storage file corrupt, starting fresh: {}", e);
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self::from_entries(Some(path), entries))
    }

    /// `<data_dir>/courseplan-sync/local_storage.json`
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .context("Failed to get data directory")?
            .join("courseplan-sync");
        Ok(data_dir.join(STORAGE_FILE_NAME))
    }

    /// Another handle on the same storage, like a second tab.
    pub fn new_handle(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            handle_id: self.shared.next_handle.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn from_entries(path: Option<PathBuf>, entries: BTreeMap<String, String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            path,
            entries: Mutex::new(entries),
            events,
            next_handle: AtomicU64::new(1),
        });
        Self {
            shared,
            handle_id: 0,
        }
    }

    fn write_file(path: &Path, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create storage directory")?;
        }
        let contents =
            serde_json::to_string_pretty(entries).context("Failed to serialize local storage")?;
        fs::write(path, contents).context("Failed to write local storage file")?;
        Ok(())
    }

    /// Apply `change` under the lock, persist, then notify the other handles.
    fn mutate<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> Vec<StorageEvent>,
    {
        let mut entries = self
            .shared
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("lock poisoned: {e}"))?;
        let events = change(&mut entries);
        if events.is_empty() {
            return Ok(());
        }
        if let Some(ref path) = self.shared.path {
            Self::write_file(path, &entries)?;
        }
        for event in events {
            // No subscribers is fine.
            let _ = self.shared.events.send(event);
        }
        Ok(())
    }
}

#[async_trait]
impl PlanStorage for LocalStorage {
    fn backend_name(&self) -> &str {
        if self.shared.path.is_some() {
            "file"
        } else {
            "memory"
        }
    }

    fn handle_id(&self) -> HandleId {
        self.handle_id
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .shared
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("lock poisoned: {e}"))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let origin = self.handle_id;
        self.mutate(|entries| {
            if entries.get(key).map(String::as_str) == Some(value) {
                return Vec::new();
            }
            entries.insert(key.to_string(), value.to_string());
            vec![StorageEvent {
                key: key.to_string(),
                new_value: Some(value.to_string()),
                origin,
            }]
        })
    }

    async fn clear(&self) -> Result<()> {
        let origin = self.handle_id;
        self.mutate(|entries| {
            let removed = std::mem::take(entries);
            removed
                .into_keys()
                .map(|key| StorageEvent {
                    key,
                    new_value: None,
                    origin,
                })
                .collect()
        })
    }

    fn subscribe(&self) -> StorageEvents {
        StorageEvents::new(self.shared.events.subscribe(), self.handle_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_set_get_overwrite() {
        let storage = LocalStorage::in_memory();
        assert_eq!(storage.get("k").await.unwrap(), None);
        storage.set("k", "v").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap().as_deref(), Some("v"));
        storage.set("k", "w").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap().as_deref(), Some("w"));
        assert_eq!(storage.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let storage = LocalStorage::open(&path).unwrap();
        storage.set("coursePlanSchedules", "{}").await.unwrap();
        assert_eq!(storage.backend_name(), "file");
        drop(storage);

        let reopened = LocalStorage::open(&path).unwrap();
        assert_eq!(
            reopened.get("coursePlanSchedules").await.unwrap().as_deref(),
            Some("{}")
        );
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "not json {{").unwrap();

        let storage = LocalStorage::open(&path).unwrap();
        assert_eq!(storage.get("anything").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_other_handles_see_writes_but_writer_does_not() {
        let tab_a = LocalStorage::in_memory();
        let tab_b = tab_a.new_handle();
        let mut a_events = tab_a.subscribe();
        let mut b_events = tab_b.subscribe();

        tab_a.set("openPages", "1").await.unwrap();

        let event = b_events.recv().await.unwrap();
        assert_eq!(event.key, "openPages");
        assert_eq!(event.new_value.as_deref(), Some("1"));
        assert_eq!(event.origin, tab_a.handle_id());

        let nothing = tokio::time::timeout(Duration::from_millis(20), a_events.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn test_unchanged_value_is_not_announced() {
        let tab_a = LocalStorage::in_memory();
        let tab_b = tab_a.new_handle();
        tab_a.set("k", "same").await.unwrap();
        let mut b_events = tab_b.subscribe();

        tab_a.set("k", "same").await.unwrap();
        tab_a.set("k", "different").await.unwrap();

        let event = b_events.recv().await.unwrap();
        assert_eq!(event.new_value.as_deref(), Some("different"));
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let storage = LocalStorage::in_memory();
        let other = storage.new_handle();
        storage.set("a", "1").await.unwrap();
        storage.set("b", "2").await.unwrap();
        let mut events = other.subscribe();

        storage.clear().await.unwrap();

        assert_eq!(other.get("a").await.unwrap(), None);
        assert_eq!(events.recv().await.unwrap().new_value, None);
        assert_eq!(events.recv().await.unwrap().new_value, None);
    }
}
