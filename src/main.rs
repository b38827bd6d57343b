use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use courseplan_sync::config::Config;
use courseplan_sync::gateway::{HttpGateway, MemoryGateway, ScheduleGateway};
use courseplan_sync::storage::{LocalStorage, PlanStorage};
use courseplan_sync::PlannerSession;

#[tokio::main]
async fn main() -> Result<()> {
    // Default to INFO, overridable with RUST_LOG
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Could not load config, using defaults: {:#}", e);
            Config::default()
        }
    };

    let storage_path = match config.storage.path {
        Some(ref path) if !path.trim().is_empty() => path.into(),
        _ => LocalStorage::default_path()?,
    };
    let storage: Arc<dyn PlanStorage> = Arc::new(
        LocalStorage::open(&storage_path)
            .with_context(|| format!("Failed to open storage at {}", storage_path.display()))?,
    );
    tracing::info!("Using {} storage at {}", storage.backend_name(), storage_path.display());

    if std::env::args().skip(1).any(|arg| arg == "--reset") {
        return PlannerSession::reset(storage.as_ref()).await;
    }

    let gateway: Arc<dyn ScheduleGateway> = if config.is_offline() {
        tracing::info!("No backend configured; running against the in-process demo backend");
        Arc::new(MemoryGateway::new())
    } else {
        tracing::info!("Syncing with {}", config.backend.base_url);
        Arc::new(HttpGateway::new(&config.backend)?)
    };

    let session = PlannerSession::start(storage, gateway, &config.sync).await?;
    let mut stopped = session.shutdown_signal();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Interrupted");
        }
        _ = stopped.wait_for(|stopped| *stopped) => {}
    }

    let state = session.shutdown().await?;
    tracing::info!(
        "{} schedules, {} cart sections, selected {:?}",
        state.schedules.len(),
        state.cart_sections.len(),
        state.schedule_selected
    );
    Ok(())
}
