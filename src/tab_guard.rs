//! Cooperative single-tab guard.
//!
//! Every session writes its token to `openPages`. A session that sees another
//! session's `openPages` write answers on `pageAvailable`; whoever sees a
//! `pageAvailable` write runs its shutdown callback and stops listening. A
//! newcomer therefore yields to the session already running. Nothing is
//! locked: sessions that ignore the protocol are not stopped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use crate::storage::{PlanStorage, OPEN_PAGES_KEY, PAGE_AVAILABLE_KEY};

static TOKEN_SEQ: AtomicU64 = AtomicU64::new(0);

/// Wall-clock token, unique within the process even for sessions opened in
/// the same millisecond.
fn new_token() -> String {
    format!(
        "{}-{}",
        chrono::Utc::now().timestamp_millis(),
        TOKEN_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

pub struct TabGuard {
    token: String,
    listener: JoinHandle<()>,
}

impl TabGuard {
    /// Announce this session and start listening. `on_shutdown` runs at most
    /// once, when another session answers on `pageAvailable`.
    pub async fn install<F>(storage: Arc<dyn PlanStorage>, on_shutdown: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let token = new_token();
        let mut events = storage.subscribe();
        storage
            .set(OPEN_PAGES_KEY, &token)
            .await
            .context("Failed to announce open page")?;
        tracing::debug!("Tab guard installed with token {}", token);

        let own = token.clone();
        let listener = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(value) = event.new_value else {
                    continue;
                };
                match event.key.as_str() {
                    OPEN_PAGES_KEY => {
                        // Keyed on the newcomer so every answer is a fresh value.
                        let answer = format!("{own}:{value}");
                        if let Err(e) = storage.set(PAGE_AVAILABLE_KEY, &answer).await {
                            tracing::warn!("Could not answer open page {}: {:#}", value, e);
                        }
                    }
                    PAGE_AVAILABLE_KEY => {
                        tracing::info!("Another session is active ({}); shutting down sync", value);
                        on_shutdown();
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self { token, listener })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// False once the guard has shut this session down or the storage closed.
    pub fn is_listening(&self) -> bool {
        !self.listener.is_finished()
    }
}

impl Drop for TabGuard {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
