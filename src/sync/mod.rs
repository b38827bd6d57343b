//! Background reconciliation between the local store and the backend.
//!
//! One cycle is pull-then-push:
//!
//! ```text
//! pull:  GET /schedules/ -> UpdateSchedules -> drop schedules the backend
//!        stopped reporting -> create the cart upstream if it is missing
//! push:  DELETE queued deletions -> PUT dirty cart -> POST/PUT dirty schedules
//! ```
//!
//! Push requests are spawned and not awaited; their results are dispatched
//! whenever they land, possibly interleaved with the next pull or with user
//! edits. Each result names the section ids it sent, and each create carries
//! a token that follows the schedule through renames. Network failures are
//! logged and the next cycle is the retry.

pub mod state;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinSet;

pub use state::SyncState;

use crate::gateway::{ScheduleGateway, ScheduleUpdate};
use crate::models::{section_ids, CreationToken, Section, ServerId, CART_NAME};
use crate::reducer::Action;
use crate::storage::PlanStorage;
use crate::store::Store;

pub struct Reconciler {
    store: Arc<Store>,
    gateway: Arc<dyn ScheduleGateway>,
    storage: Arc<dyn PlanStorage>,
    sync_state: SyncState,
    interval: Duration,
    cart_creation_in_flight: Arc<AtomicBool>,
    next_creation_token: CreationToken,
    in_flight: JoinSet<()>,
}

impl Reconciler {
    pub async fn new(
        store: Arc<Store>,
        gateway: Arc<dyn ScheduleGateway>,
        storage: Arc<dyn PlanStorage>,
        interval: Duration,
    ) -> Self {
        let sync_state = SyncState::load(storage.as_ref()).await;
        if sync_state.first_sync {
            tracing::info!("First backend sync for this store; local schedules will be uploaded");
        }
        Self {
            store,
            gateway,
            storage,
            sync_state,
            interval,
            cart_creation_in_flight: Arc::new(AtomicBool::new(false)),
            next_creation_token: 0,
            in_flight: JoinSet::new(),
        }
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.sync_state
    }

    /// Cycle until `shutdown` reads true. The flag is only checked between
    /// cycles, after the delay. Requests already spawned are never
    /// interrupted; the loop waits for them before returning.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Sync loop started ({} backend, every {:?})",
            self.gateway.backend_name(),
            self.interval
        );
        while !*shutdown.borrow() {
            self.run_cycle().await;
            tokio::time::sleep(self.interval).await;
        }
        self.settle().await;
        tracing::info!("Sync loop stopped");
    }

    /// One pull-then-push round. A failed pull skips the push.
    pub async fn run_cycle(&mut self) {
        self.reap_finished();
        match self.pull().await {
            Ok(()) => self.push().await,
            Err(e) => tracing::warn!("Sync pull failed, retrying next cycle: {:#}", e),
        }
    }

    pub async fn pull(&mut self) -> Result<()> {
        let records = self
            .gateway
            .list_schedules()
            .await
            .context("Failed to pull schedules")?;
        let has_cart = records.iter().any(|r| r.name == CART_NAME);
        let current: BTreeSet<ServerId> = records.iter().map(|r| r.id).collect();
        tracing::debug!("Pulled {} schedules", records.len());

        self.store.dispatch(Action::UpdateSchedules(records)).await;

        let vanished = self.sync_state.observe(&current);
        if !vanished.is_empty() {
            let state = self.store.snapshot().await;
            for id in vanished {
                match state.schedule_name_for_id(id) {
                    Some(name) => {
                        tracing::info!("Schedule {:?} (id {}) was deleted remotely", name, id);
                        self.store
                            .dispatch(Action::ScheduleDeletedRemotely(name.to_string()))
                            .await;
                    }
                    None => tracing::debug!("Observed schedule {} is gone", id),
                }
            }
        }
        self.sync_state.save_observed(self.storage.as_ref()).await;

        if !has_cart {
            let cart = self.store.snapshot().await.cart_sections;
            self.spawn_cart_creation(cart);
        }
        Ok(())
    }

    pub async fn push(&mut self) {
        let state = self.store.snapshot().await;

        for (&id, deletion) in &state.deleted_schedules {
            if deletion.deletion_queued {
                continue;
            }
            self.store.dispatch(Action::MarkDeletionQueued(id)).await;
            self.spawn_delete(id);
        }

        if !state.cart_pushed_to_backend {
            if let Some(cart_id) = state.cart_id {
                self.spawn_update(ScheduleUpdate {
                    id: cart_id,
                    name: CART_NAME.to_string(),
                    sections: state.cart_sections.clone(),
                    semester: None,
                });
            }
        }

        for (name, schedule) in &state.schedules {
            if schedule.pushed_to_backend {
                continue;
            }
            // The first sync uploads every local-only schedule, even one a
            // previous session had already queued.
            let should_create = schedule.id.is_none()
                && (self.sync_state.first_sync || !schedule.is_creation_queued());
            if should_create {
                self.next_creation_token = self.next_creation_token.wrapping_add(1);
                let token = self.next_creation_token;
                self.store
                    .dispatch(Action::MarkCreationQueued {
                        name: name.clone(),
                        token,
                    })
                    .await;
                self.spawn_create(name.clone(), schedule.meetings.clone(), token);
            } else if let Some(id) = schedule.id {
                self.spawn_update(ScheduleUpdate {
                    id,
                    name: name.clone(),
                    sections: schedule.meetings.clone(),
                    semester: Some(schedule.term.clone()),
                });
            }
        }

        self.sync_state.first_sync = false;
    }

    /// Wait until every request spawned so far has been answered and applied.
    pub async fn settle(&mut self) {
        while let Some(result) = self.in_flight.join_next().await {
            log_task_failure(result);
        }
    }

    fn reap_finished(&mut self) {
        while let Some(result) = self.in_flight.try_join_next() {
            log_task_failure(result);
        }
    }

    fn spawn_create(&mut self, name: String, sections: Vec<Section>, token: CreationToken) {
        let store = Arc::clone(&self.store);
        let gateway = Arc::clone(&self.gateway);
        self.in_flight.spawn(async move {
            match gateway.create_schedule(&name, &sections).await {
                Ok(id) => {
                    tracing::debug!("Created schedule {:?} with id {}", name, id);
                    store
                        .dispatch(Action::SetScheduleIdMarkSynced {
                            name,
                            id,
                            pushed: section_ids(&sections),
                            creation: Some(token),
                        })
                        .await;
                }
                Err(e) => {
                    tracing::warn!("Could not create schedule {:?}: {:#}", name, e);
                    store.dispatch(Action::CreationFailed(token)).await;
                }
            }
        });
    }

    fn spawn_update(&mut self, update: ScheduleUpdate) {
        let store = Arc::clone(&self.store);
        let gateway = Arc::clone(&self.gateway);
        self.in_flight.spawn(async move {
            match gateway.update_schedule(&update).await {
                Ok(()) => {
                    tracing::debug!("Pushed schedule {:?}", update.name);
                    // The cart is routed to its own flag by the reducer.
                    store
                        .dispatch(Action::MarkScheduleSynced {
                            pushed: section_ids(&update.sections),
                            name: update.name,
                        })
                        .await;
                }
                Err(e) => tracing::warn!("Could not push schedule {:?}: {:#}", update.name, e),
            }
        });
    }

    fn spawn_delete(&mut self, id: ServerId) {
        let store = Arc::clone(&self.store);
        let gateway = Arc::clone(&self.gateway);
        self.in_flight.spawn(async move {
            match gateway.delete_schedule(id).await {
                Ok(()) => {
                    tracing::debug!("Deleted schedule {} on backend", id);
                    store.dispatch(Action::DeletionConfirmed(id)).await;
                }
                Err(e) => tracing::warn!("Could not delete schedule {}: {:#}", id, e),
            }
        });
    }

    /// At most one cart creation is in flight at a time.
    fn spawn_cart_creation(&mut self, sections: Vec<Section>) {
        if self.cart_creation_in_flight.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Backend has no cart yet; creating it");
        let store = Arc::clone(&self.store);
        let gateway = Arc::clone(&self.gateway);
        let in_flight = Arc::clone(&self.cart_creation_in_flight);
        self.in_flight.spawn(async move {
            match gateway.create_schedule(CART_NAME, &sections).await {
                Ok(id) => {
                    store
                        .dispatch(Action::SetScheduleIdMarkSynced {
                            name: CART_NAME.to_string(),
                            id,
                            pushed: section_ids(&sections),
                            creation: None,
                        })
                        .await;
                }
                Err(e) => tracing::warn!("Could not create cart: {:#}", e),
            }
            in_flight.store(false, Ordering::Release);
        });
    }
}

fn log_task_failure(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::warn!("Sync request task failed: {}", e);
    }
}
