//! The single owner of `ClientState`.
//!
//! All writes go through [`Store::dispatch`], which runs the reducer and
//! mirrors the result to `coursePlanSchedules`. Dispatches are serialized on
//! one async lock, so the mirror always lands in dispatch order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::models::ClientState;
use crate::reducer::{reduce, Action};
use crate::storage::{PlanStorage, SCHEDULES_KEY};

pub struct Store {
    state: Mutex<ClientState>,
    storage: Arc<dyn PlanStorage>,
    mirroring: AtomicBool,
}

impl Store {
    pub fn new(state: ClientState, storage: Arc<dyn PlanStorage>) -> Self {
        Self {
            state: Mutex::new(state),
            storage,
            mirroring: AtomicBool::new(true),
        }
    }

    /// Rebuild the last mirrored state. Missing or unreadable state falls
    /// back to the default.
    pub async fn hydrate(storage: Arc<dyn PlanStorage>) -> Self {
        let state = match storage.get(SCHEDULES_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<ClientState>(&raw) {
                Ok(mut state) => {
                    state.reset_session_flags();
                    state.repair_selection();
                    tracing::debug!("Hydrated {} schedules from storage", state.schedules.len());
                    state
                }
                Err(e) => {
                    tracing::warn!("Stored schedules corrupt, starting fresh: {}", e);
                    ClientState::default()
                }
            },
            Ok(None) => ClientState::default(),
            Err(e) => {
                tracing::warn!("Could not read stored schedules: {}", e);
                ClientState::default()
            }
        };
        Self::new(state, storage)
    }

    pub async fn snapshot(&self) -> ClientState {
        self.state.lock().await.clone()
    }

    pub async fn dispatch(&self, action: Action) {
        let mut state = self.state.lock().await;
        let next = reduce(&state, action);
        if next == *state {
            return;
        }
        *state = next;
        if self.mirroring.load(Ordering::Acquire) {
            self.mirror(&state).await;
        }
    }

    /// Stop writing state changes to storage. Dispatches keep working.
    pub fn stop_mirroring(&self) {
        self.mirroring.store(false, Ordering::Release);
    }

    pub fn is_mirroring(&self) -> bool {
        self.mirroring.load(Ordering::Acquire)
    }

    async fn mirror(&self, state: &ClientState) {
        let serialized = match serde_json::to_string(state) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Could not serialize schedules: {}", e);
                return;
            }
        };
        if let Err(e) = self.storage.set(SCHEDULES_KEY, &serialized).await {
            tracing::warn!("Could not persist schedules: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreationState, Section, DEFAULT_SCHEDULE_NAME};
    use crate::storage::LocalStorage;

    async fn stored_state(storage: &LocalStorage) -> Option<ClientState> {
        storage
            .get(SCHEDULES_KEY)
            .await
            .unwrap()
            .map(|raw| serde_json::from_str(&raw).unwrap())
    }

    #[tokio::test]
    async fn test_dispatch_mirrors_to_storage() {
        let storage = Arc::new(LocalStorage::in_memory());
        let store = Store::hydrate(storage.clone()).await;

        store.dispatch(Action::AddCartItem(Section::new("CIS-120-001"))).await;

        let persisted = stored_state(&storage).await.unwrap();
        assert_eq!(persisted.cart_sections, vec![Section::new("CIS-120-001")]);
        assert_eq!(persisted, store.snapshot().await);
    }

    #[tokio::test]
    async fn test_hydrate_restores_previous_state() {
        let storage = Arc::new(LocalStorage::in_memory());
        {
            let store = Store::hydrate(storage.clone()).await;
            store.dispatch(Action::CreateSchedule("Fall".into())).await;
        }
        let store = Store::hydrate(storage).await;
        let state = store.snapshot().await;
        assert_eq!(state.schedule_selected, "Fall");
        assert!(state.schedules.contains_key(DEFAULT_SCHEDULE_NAME));
    }

    #[tokio::test]
    async fn test_hydrate_corrupt_state_falls_back_to_default() {
        let storage = Arc::new(LocalStorage::in_memory());
        storage.set(SCHEDULES_KEY, "{\"schedules\": 12").await.unwrap();
        let store = Store::hydrate(storage).await;
        assert_eq!(store.snapshot().await, ClientState::default());
    }

    #[tokio::test]
    async fn test_hydrate_resets_queue_flags_and_selection() {
        let storage = Arc::new(LocalStorage::in_memory());
        let mut state = ClientState::default();
        state.schedules.get_mut(DEFAULT_SCHEDULE_NAME).unwrap().backend_creation_state =
            Some(CreationState {
                creation_queued: true,
                token: Some(1),
            });
        state.schedule_selected = "missing".to_string();
        storage
            .set(SCHEDULES_KEY, &serde_json::to_string(&state).unwrap())
            .await
            .unwrap();

        let hydrated = Store::hydrate(storage).await.snapshot().await;
        assert_eq!(hydrated.schedule_selected, DEFAULT_SCHEDULE_NAME);
        assert!(!hydrated.selected_schedule().unwrap().is_creation_queued());
    }

    #[tokio::test]
    async fn test_stop_mirroring_leaves_storage_untouched() {
        let storage = Arc::new(LocalStorage::in_memory());
        let store = Store::hydrate(storage.clone()).await;
        store.stop_mirroring();
        assert!(!store.is_mirroring());

        store.dispatch(Action::CreateSchedule("Unsaved".into())).await;

        assert_eq!(store.snapshot().await.schedule_selected, "Unsaved");
        assert!(stored_state(&storage).await.is_none());
    }
}
