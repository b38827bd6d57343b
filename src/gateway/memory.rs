//! In-process backend.
//!
//! Behaves like the plan API for one logged-in user: ids are assigned on
//! create, updates replace the section list, deletes drop the record. Used
//! as the demo backend when no server is configured, and by tests, which can
//! take it offline, add latency, or edit it behind the client's back.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{ScheduleGateway, ScheduleUpdate};
use crate::models::{section_ids, BackendSchedule, Section, ServerId};

/// A request as the backend saw it, section lists reduced to ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayRequest {
    List,
    Create { name: String, sections: Vec<String> },
    Update { id: ServerId, name: String, sections: Vec<String> },
    Delete(ServerId),
}

struct Backend {
    schedules: BTreeMap<ServerId, BackendSchedule>,
    next_id: ServerId,
    offline: bool,
    latency: Duration,
    requests: Vec<GatewayRequest>,
}

pub struct MemoryGateway {
    backend: Mutex<Backend>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            backend: Mutex::new(Backend {
                schedules: BTreeMap::new(),
                next_id: 1,
                offline: false,
                latency: Duration::ZERO,
                requests: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Backend> {
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a schedule as if another device created it.
    pub fn insert(&self, name: &str, sections: Vec<Section>) -> ServerId {
        let mut backend = self.lock();
        let id = backend.next_id;
        backend.next_id += 1;
        backend.schedules.insert(
            id,
            BackendSchedule {
                id,
                name: name.to_string(),
                sections,
                semester: None,
            },
        );
        id
    }

    /// Drop a schedule as if another device deleted it.
    pub fn remove(&self, id: ServerId) -> bool {
        self.lock().schedules.remove(&id).is_some()
    }

    /// Id handed to the next created schedule.
    pub fn set_next_id(&self, id: ServerId) {
        self.lock().next_id = id;
    }

    /// While offline every request fails.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Delay applied to every request before it is answered.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn schedules(&self) -> Vec<BackendSchedule> {
        self.lock().schedules.values().cloned().collect()
    }

    pub fn schedule_named(&self, name: &str) -> Option<BackendSchedule> {
        self.lock()
            .schedules
            .values()
            .find(|s| s.name == name)
            .cloned()
    }

    pub fn requests(&self) -> Vec<GatewayRequest> {
        self.lock().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.lock().requests.clear();
    }

    /// Log the request, then wait out the configured latency.
    async fn begin(&self, request: GatewayRequest) -> Result<()> {
        let latency = {
            let mut backend = self.lock();
            backend.requests.push(request);
            backend.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.lock().offline {
            return Err(anyhow!("memory backend is offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl ScheduleGateway for MemoryGateway {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn list_schedules(&self) -> Result<Vec<BackendSchedule>> {
        self.begin(GatewayRequest::List).await?;
        Ok(self.schedules())
    }

    async fn create_schedule(&self, name: &str, sections: &[Section]) -> Result<ServerId> {
        self.begin(GatewayRequest::Create {
            name: name.to_string(),
            sections: section_ids(sections),
        })
        .await?;
        Ok(self.insert(name, sections.to_vec()))
    }

    async fn update_schedule(&self, update: &ScheduleUpdate) -> Result<()> {
        self.begin(GatewayRequest::Update {
            id: update.id,
            name: update.name.clone(),
            sections: section_ids(&update.sections),
        })
        .await?;
        let mut backend = self.lock();
        let record = backend
            .schedules
            .get_mut(&update.id)
            .ok_or_else(|| anyhow!("schedule {} not found", update.id))?;
        record.name = update.name.clone();
        record.sections = update.sections.clone();
        if update.semester.is_some() {
            record.semester = update.semester.clone();
        }
        Ok(())
    }

    async fn delete_schedule(&self, id: ServerId) -> Result<()> {
        self.begin(GatewayRequest::Delete(id)).await?;
        if self.remove(id) {
            Ok(())
        } else {
            Err(anyhow!("schedule {id} not found"))
        }
    }
}
