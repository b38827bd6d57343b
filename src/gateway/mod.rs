//! Backend gateway: the REST-shaped schedule endpoints the planner syncs with.
//!
//! - [`HttpGateway`]: the real plan API over reqwest
//! - [`MemoryGateway`]: an in-process backend for offline demo mode and tests

pub mod http;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{BackendSchedule, Section, ServerId};

pub use http::HttpGateway;
pub use memory::MemoryGateway;

/// Body of `POST /schedules/`.
#[derive(Debug, Clone, Serialize)]
pub struct NewSchedule<'a> {
    pub name: &'a str,
    pub sections: &'a [Section],
}

/// Body of `PUT /schedules/{id}/`. Always carries the full section list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    pub id: ServerId,
    pub name: String,
    pub sections: Vec<Section>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semester: Option<String>,
}

/// Response of `POST /schedules/`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedSchedule {
    pub id: Option<ServerId>,
}

#[async_trait]
pub trait ScheduleGateway: Send + Sync {
    /// Human-readable backend name (e.g., "http", "memory").
    fn backend_name(&self) -> &str;

    /// Every schedule the backend holds for the user, cart included.
    async fn list_schedules(&self) -> Result<Vec<BackendSchedule>>;

    /// Create a schedule and return its server id.
    async fn create_schedule(&self, name: &str, sections: &[Section]) -> Result<ServerId>;

    async fn update_schedule(&self, update: &ScheduleUpdate) -> Result<()>;

    async fn delete_schedule(&self, id: ServerId) -> Result<()>;
}
