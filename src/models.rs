//! Schedule, cart and section data shared by the reducer, the store and the
//! reconciliation loop.
//!
//! Field names serialize in camelCase so the persisted `coursePlanSchedules`
//! blob keeps the same shape the planner has always written.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Server-assigned schedule identifier.
pub type ServerId = u64;

/// Client-assigned key of one in-flight create request. Unlike the schedule
/// name it survives a rename.
pub type CreationToken = u64;

/// Name of the distinguished cart pseudo-schedule on the backend.
pub const CART_NAME: &str = "cart";
pub const DEFAULT_SCHEDULE_NAME: &str = "Schedule";
/// Inserted when the last schedule is deleted so there is always one.
pub const PLACEHOLDER_SCHEDULE_NAME: &str = "Empty Schedule";
pub const DEFAULT_TERM: &str = "2019A";

/// One schedulable course section.
///
/// Identity is the section id alone. Meeting times, instructors and any other
/// display metadata ride along in `details` untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    #[serde(deserialize_with = "deserialize_section_id")]
    pub id: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl Section {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            details: Map::new(),
        }
    }
}

impl PartialEq for Section {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Section {}

/// Section ids arrive as strings ("CIS-120-001") from the course API but as
/// plain numbers from some older schedule payloads.
fn deserialize_section_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "section id must be a string or number, got {other}"
        ))),
    }
}

pub fn contains_section(sections: &[Section], id: &str) -> bool {
    sections.iter().any(|s| s.id == id)
}

pub fn section_ids(sections: &[Section]) -> Vec<String> {
    sections.iter().map(|s| s.id.clone()).collect()
}

/// True when `sections` holds exactly the ids in `ids`, in any order.
pub fn has_exactly(sections: &[Section], ids: &[String]) -> bool {
    sections.len() == ids.len() && ids.iter().all(|id| contains_section(sections, id))
}

/// Append every section of `incoming` whose id is not yet in `target`.
/// Returns how many were added.
pub fn union_sections(target: &mut Vec<Section>, incoming: &[Section]) -> usize {
    let mut added = 0;
    for section in incoming {
        if !contains_section(target, &section.id) {
            target.push(section.clone());
            added += 1;
        }
    }
    added
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreationState {
    pub creation_queued: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<CreationToken>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionState {
    pub deletion_queued: bool,
}

/// A named, user-editable collection of sections for a term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ServerId>,
    #[serde(default = "default_term")]
    pub term: String,
    /// Unique by section id; order is display order only.
    #[serde(default)]
    pub meetings: Vec<Section>,
    #[serde(default)]
    pub color_palette: Vec<String>,
    /// `false` marks the schedule dirty: it has local changes to push.
    #[serde(default = "default_true")]
    pub pushed_to_backend: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_creation_state: Option<CreationState>,
}

fn default_term() -> String {
    DEFAULT_TERM.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            id: None,
            term: default_term(),
            meetings: Vec::new(),
            color_palette: Vec::new(),
            pushed_to_backend: true,
            backend_creation_state: None,
        }
    }
}

impl Schedule {
    /// Materialize a schedule first seen on the backend. It already matches
    /// the server, so it starts out pushed.
    pub fn from_backend(record: &BackendSchedule) -> Self {
        let mut meetings = Vec::new();
        union_sections(&mut meetings, &record.sections);
        Self {
            id: Some(record.id),
            term: record.semester.clone().unwrap_or_else(default_term),
            meetings,
            color_palette: Vec::new(),
            pushed_to_backend: true,
            backend_creation_state: None,
        }
    }

    pub fn is_creation_queued(&self) -> bool {
        self.backend_creation_state
            .map(|s| s.creation_queued)
            .unwrap_or(false)
    }

    pub fn creation_token(&self) -> Option<CreationToken> {
        self.backend_creation_state.and_then(|s| s.token)
    }
}

/// Everything the state container owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientState {
    pub schedules: BTreeMap<String, Schedule>,
    /// Always a key of `schedules`.
    pub schedule_selected: String,
    #[serde(default)]
    pub cart_sections: Vec<Section>,
    #[serde(default)]
    pub cart_pushed_to_backend: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart_id: Option<ServerId>,
    /// Schedules deleted locally whose backend deletion is still pending.
    #[serde(default)]
    pub deleted_schedules: BTreeMap<ServerId, DeletionState>,
}

impl Default for ClientState {
    fn default() -> Self {
        let mut schedules = BTreeMap::new();
        schedules.insert(DEFAULT_SCHEDULE_NAME.to_string(), Schedule::default());
        Self {
            schedules,
            schedule_selected: DEFAULT_SCHEDULE_NAME.to_string(),
            cart_sections: Vec::new(),
            cart_pushed_to_backend: false,
            cart_id: None,
            deleted_schedules: BTreeMap::new(),
        }
    }
}

impl ClientState {
    pub fn selected_schedule(&self) -> Option<&Schedule> {
        self.schedules.get(&self.schedule_selected)
    }

    /// Name of the schedule whose create request carries `token`.
    pub fn schedule_name_for_creation(&self, token: CreationToken) -> Option<&str> {
        self.schedules
            .iter()
            .find(|(_, schedule)| schedule.creation_token() == Some(token))
            .map(|(name, _)| name.as_str())
    }

    /// Name of the local schedule stamped with server id `id`, if any.
    pub fn schedule_name_for_id(&self, id: ServerId) -> Option<&str> {
        self.schedules
            .iter()
            .find(|(_, schedule)| schedule.id == Some(id))
            .map(|(name, _)| name.as_str())
    }

    /// Restore the non-empty / valid-selection invariants.
    pub fn repair_selection(&mut self) {
        if self.schedules.is_empty() {
            self.schedules
                .insert(PLACEHOLDER_SCHEDULE_NAME.to_string(), Schedule::default());
        }
        if !self.schedules.contains_key(&self.schedule_selected) {
            if let Some(first) = self.schedules.keys().next() {
                self.schedule_selected = first.clone();
            }
        }
    }

    /// Queue markers only mean something within one session; a request that
    /// was in flight when the last session died never reported back.
    pub fn reset_session_flags(&mut self) {
        for schedule in self.schedules.values_mut() {
            if let Some(state) = schedule.backend_creation_state.as_mut() {
                state.creation_queued = false;
                state.token = None;
            }
        }
        for deletion in self.deleted_schedules.values_mut() {
            deletion.deletion_queued = false;
        }
    }
}

/// A schedule as reported by `GET /schedules/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSchedule {
    pub id: ServerId,
    pub name: String,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semester: Option<String>,
}
