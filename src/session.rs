//! The process-wide planner context: hydrated store, sync loop and tab guard.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::gateway::ScheduleGateway;
use crate::models::ClientState;
use crate::reducer::Action;
use crate::storage::PlanStorage;
use crate::store::Store;
use crate::sync::Reconciler;
use crate::tab_guard::TabGuard;

/// Background half of a session; absent when sync is disabled.
struct SyncHandle {
    task: JoinHandle<()>,
    tab_guard: TabGuard,
}

pub struct PlannerSession {
    store: Arc<Store>,
    shutdown: Arc<watch::Sender<bool>>,
    sync: Option<SyncHandle>,
}

impl PlannerSession {
    /// Hydrate the store from `storage` and, if enabled, start the sync loop
    /// behind a tab guard.
    pub async fn start(
        storage: Arc<dyn PlanStorage>,
        gateway: Arc<dyn ScheduleGateway>,
        config: &SyncConfig,
    ) -> Result<Self> {
        let store = Arc::new(Store::hydrate(Arc::clone(&storage)).await);
        let shutdown = Arc::new(watch::channel(false).0);

        if !config.enabled {
            tracing::info!("Backend sync disabled; planner is local only");
            return Ok(Self {
                store,
                shutdown,
                sync: None,
            });
        }

        let reconciler = Reconciler::new(
            Arc::clone(&store),
            gateway,
            Arc::clone(&storage),
            Duration::from_millis(config.interval_ms),
        )
        .await;

        let stop = Arc::clone(&shutdown);
        let tab_guard = TabGuard::install(storage, move || {
            stop.send_replace(true);
        })
        .await
        .context("Failed to install tab guard")?;

        let task = tokio::spawn(reconciler.run(shutdown.subscribe()));
        tracing::info!("Planner session started (tab {})", tab_guard.token());

        Ok(Self {
            store,
            shutdown,
            sync: Some(SyncHandle { task, tab_guard }),
        })
    }

    /// Forget every schedule, the cart and all sync bookkeeping. The next
    /// session starts from the default state and uploads as a first sync.
    /// Call with no session running on `storage`.
    pub async fn reset(storage: &dyn PlanStorage) -> Result<()> {
        storage
            .clear()
            .await
            .with_context(|| format!("Failed to clear {} storage", storage.backend_name()))?;
        tracing::info!("Cleared {} storage; planner reset", storage.backend_name());
        Ok(())
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub async fn dispatch(&self, action: Action) {
        self.store.dispatch(action).await;
    }

    pub async fn snapshot(&self) -> ClientState {
        self.store.snapshot().await
    }

    /// Turns true when the session is shutting down, including when the tab
    /// guard yields to another session.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.sync.is_some() && !*self.shutdown.borrow()
    }

    pub fn tab_token(&self) -> Option<&str> {
        self.sync.as_ref().map(|s| s.tab_guard.token())
    }

    /// Stop the loop after its current cycle, let spawned requests land,
    /// then stop mirroring. Returns the final state.
    pub async fn shutdown(self) -> Result<ClientState> {
        self.shutdown.send_replace(true);
        if let Some(sync) = self.sync {
            drop(sync.tab_guard);
            sync.task.await.context("Sync loop panicked")?;
        }
        self.store.stop_mirroring();
        tracing::info!("Planner session stopped");
        Ok(self.store.snapshot().await)
    }
}
