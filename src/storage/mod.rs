//! Local persistent store for the planner.
//!
//! - [`LocalStorage`]: string key/value map kept in a JSON file (or purely
//!   in memory), shared by every handle opened on it.
//!
//! Several handles on one store behave like browser tabs sharing
//! `localStorage`: a write through one handle is announced to every *other*
//! handle as a [`StorageEvent`], which is what the tab guard listens on.

pub mod local;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

pub use local::LocalStorage;

/// Serialized `ClientState`, rewritten on every state change.
pub const SCHEDULES_KEY: &str = "coursePlanSchedules";
/// Every backend schedule id observed so far.
pub const OBSERVED_SCHEDULES_KEY: &str = "coursePlanObservedSchedules";
/// Present once this store has taken part in a backend sync.
pub const USES_BACKEND_SYNC_KEY: &str = "usesBackendSync";
pub const OPEN_PAGES_KEY: &str = "openPages";
pub const PAGE_AVAILABLE_KEY: &str = "pageAvailable";

/// Identifies the handle a write came through.
pub type HandleId = u64;

/// A value changed through some handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
    pub origin: HandleId,
}

/// Change notifications for one handle; its own writes are filtered out.
pub struct StorageEvents {
    rx: broadcast::Receiver<StorageEvent>,
    own: HandleId,
}

impl StorageEvents {
    pub fn new(rx: broadcast::Receiver<StorageEvent>, own: HandleId) -> Self {
        Self { rx, own }
    }

    /// Next change made through another handle. `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.origin == self.own => continue,
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Storage listener lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Key/value persistence used by the store, the sync loop and the tab guard.
#[async_trait]
pub trait PlanStorage: Send + Sync {
    /// Human-readable backend name (e.g., "file", "memory").
    fn backend_name(&self) -> &str;

    fn handle_id(&self) -> HandleId;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value`. Other handles are notified only if the value changed.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Drop every key. Used to reset the planner to a fresh install.
    async fn clear(&self) -> Result<()>;

    /// Listen for writes made through other handles.
    fn subscribe(&self) -> StorageEvents;
}
