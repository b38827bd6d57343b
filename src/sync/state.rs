//! Session bookkeeping for the reconciliation loop.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::models::ServerId;
use crate::storage::{PlanStorage, OBSERVED_SCHEDULES_KEY, USES_BACKEND_SYNC_KEY};

/// Ids the backend has reported, plus whether this is the store's first sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    /// Every backend schedule id seen and not since seen disappearing.
    /// Tells "never existed" apart from "existed, then deleted remotely".
    pub schedules_observed: BTreeSet<ServerId>,
    pub first_sync: bool,
}

/// Older builds stored the observed set as `{"7": true}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredObserved {
    List(Vec<ServerId>),
    Map(BTreeMap<String, bool>),
}

fn parse_observed(raw: &str) -> BTreeSet<ServerId> {
    match serde_json::from_str::<StoredObserved>(raw) {
        Ok(StoredObserved::List(ids)) => ids.into_iter().collect(),
        Ok(StoredObserved::Map(map)) => map
            .into_iter()
            .filter(|(_, seen)| *seen)
            .filter_map(|(id, _)| id.parse().ok())
            .collect(),
        Err(e) => {
            tracing::warn!("Observed schedule set corrupt, starting empty: {}", e);
            BTreeSet::new()
        }
    }
}

impl SyncState {
    /// Read the observed set and claim the store for backend sync.
    pub async fn load(storage: &dyn PlanStorage) -> Self {
        let schedules_observed = match storage.get(OBSERVED_SCHEDULES_KEY).await {
            Ok(Some(raw)) => parse_observed(&raw),
            Ok(None) => BTreeSet::new(),
            Err(e) => {
                tracing::warn!("Could not read observed schedules: {}", e);
                BTreeSet::new()
            }
        };

        let first_sync = match storage.get(USES_BACKEND_SYNC_KEY).await {
            Ok(marker) => marker.is_none(),
            Err(e) => {
                tracing::warn!("Could not read sync marker: {}", e);
                true
            }
        };
        if let Err(e) = storage.set(USES_BACKEND_SYNC_KEY, "true").await {
            tracing::warn!("Could not write sync marker: {}", e);
        }

        Self {
            schedules_observed,
            first_sync,
        }
    }

    /// Fold in the ids of one pull. Returns the previously observed ids that
    /// are now missing; they are dropped from the set.
    pub fn observe(&mut self, current: &BTreeSet<ServerId>) -> Vec<ServerId> {
        self.schedules_observed.extend(current.iter().copied());
        let vanished: Vec<ServerId> = self
            .schedules_observed
            .difference(current)
            .copied()
            .collect();
        for id in &vanished {
            self.schedules_observed.remove(id);
        }
        vanished
    }

    pub async fn save_observed(&self, storage: &dyn PlanStorage) {
        let ids: Vec<ServerId> = self.schedules_observed.iter().copied().collect();
        let serialized = match serde_json::to_string(&ids) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Could not serialize observed schedules: {}", e);
                return;
            }
        };
        if let Err(e) = storage.set(OBSERVED_SCHEDULES_KEY, &serialized).await {
            tracing::warn!("Could not persist observed schedules: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;

    #[tokio::test]
    async fn test_first_load_is_first_sync() {
        let storage = LocalStorage::in_memory();
        let state = SyncState::load(&storage).await;
        assert!(state.first_sync);
        assert!(state.schedules_observed.is_empty());

        let again = SyncState::load(&storage).await;
        assert!(!again.first_sync);
    }

    #[tokio::test]
    async fn test_observed_set_round_trips_through_storage() {
        let storage = LocalStorage::in_memory();
        let mut state = SyncState::load(&storage).await;
        state.observe(&BTreeSet::from([3, 5]));
        state.save_observed(&storage).await;

        let reloaded = SyncState::load(&storage).await;
        assert_eq!(reloaded.schedules_observed, BTreeSet::from([3, 5]));
    }

    #[tokio::test]
    async fn test_legacy_map_format_is_read() {
        let storage = LocalStorage::in_memory();
        storage
            .set(OBSERVED_SCHEDULES_KEY, r#"{"7": true, "8": false, "x": true}"#)
            .await
            .unwrap();
        let state = SyncState::load(&storage).await;
        assert_eq!(state.schedules_observed, BTreeSet::from([7]));
    }

    #[tokio::test]
    async fn test_corrupt_observed_set_falls_back_to_empty() {
        let storage = LocalStorage::in_memory();
        storage.set(OBSERVED_SCHEDULES_KEY, "[1, 2").await.unwrap();
        let state = SyncState::load(&storage).await;
        assert!(state.schedules_observed.is_empty());
    }

    #[test]
    fn test_observe_reports_vanished_ids() {
        let mut state = SyncState::default();
        assert!(state.observe(&BTreeSet::from([1, 7])).is_empty());
        assert_eq!(state.observe(&BTreeSet::from([1, 9])), vec![7]);
        assert_eq!(state.schedules_observed, BTreeSet::from([1, 9]));
    }
}
