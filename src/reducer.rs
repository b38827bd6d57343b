//! Pure state transitions for schedules and the cart.
//!
//! `reduce` never performs I/O. Actions aimed at a schedule that no longer
//! exists leave the state untouched, so a late backend response can never
//! resurrect something the user deleted. A create that lands after its
//! schedule was deleted queues the new backend record for deletion instead.
//!
//! Sync acknowledgements carry the section ids that were sent. An edit made
//! while the request was in flight keeps the schedule (or cart) dirty.

use std::collections::BTreeMap;

use crate::models::{
    contains_section, has_exactly, union_sections, BackendSchedule, ClientState,
    CreationState, CreationToken, DeletionState, Schedule, Section, ServerId, CART_NAME,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Insert a fresh schedule and select it. Overwrites an existing name.
    CreateSchedule(String),
    /// User deletion; queues a backend delete when the schedule has a server id.
    DeleteSchedule(String),
    /// The backend stopped reporting this schedule. Same removal, no backend delete.
    ScheduleDeletedRemotely(String),
    RenameSchedule { old_name: String, new_name: String },
    DuplicateSchedule(String),
    SelectSchedule(String),
    ToggleSectionInSelected(Section),
    RemoveScheduleItem(String),
    ClearSchedule,
    AddCartItem(Section),
    RemoveCartItem(String),
    /// A push of `pushed` succeeded; "cart" targets the cart.
    MarkScheduleSynced { name: String, pushed: Vec<String> },
    MarkCartSynced { pushed: Vec<String> },
    /// A create sent as `name` with `pushed` answered with `id`. With a
    /// `creation` token the schedule is found even if renamed since.
    SetScheduleIdMarkSynced {
        name: String,
        id: ServerId,
        pushed: Vec<String>,
        creation: Option<CreationToken>,
    },
    MarkCreationQueued { name: String, token: CreationToken },
    CreationFailed(CreationToken),
    MarkDeletionQueued(ServerId),
    DeletionConfirmed(ServerId),
    UpdateSchedules(Vec<BackendSchedule>),
}

pub fn reduce(state: &ClientState, action: Action) -> ClientState {
    let mut next = state.clone();
    match action {
        Action::CreateSchedule(name) => {
            next.schedules.insert(name.clone(), Schedule::default());
            next.schedule_selected = name;
        }
        Action::DeleteSchedule(name) => remove_schedule(&mut next, &name, true),
        Action::ScheduleDeletedRemotely(name) => remove_schedule(&mut next, &name, false),
        Action::RenameSchedule { old_name, new_name } => {
            rename_schedule(&mut next, &old_name, new_name);
        }
        Action::DuplicateSchedule(name) => {
            if let Some(source) = next.schedules.get(&name) {
                let copy = Schedule {
                    id: None,
                    pushed_to_backend: false,
                    backend_creation_state: None,
                    ..source.clone()
                };
                let copy_name = next_available_name(&name, &next.schedules);
                next.schedules.insert(copy_name, copy);
            }
        }
        Action::SelectSchedule(name) => {
            if next.schedules.contains_key(&name) {
                next.schedule_selected = name;
            }
        }
        Action::ToggleSectionInSelected(section) => {
            if let Some(schedule) = next.schedules.get_mut(&state.schedule_selected) {
                if contains_section(&schedule.meetings, &section.id) {
                    schedule.meetings.retain(|m| m.id != section.id);
                } else {
                    schedule.meetings.push(section);
                }
                schedule.pushed_to_backend = false;
            }
        }
        Action::RemoveScheduleItem(id) => {
            if let Some(schedule) = next.schedules.get_mut(&state.schedule_selected) {
                let before = schedule.meetings.len();
                schedule.meetings.retain(|m| m.id != id);
                if schedule.meetings.len() != before {
                    schedule.pushed_to_backend = false;
                }
            }
        }
        Action::ClearSchedule => {
            // Dirties the selected schedule itself; the cart flag is unrelated.
            if let Some(schedule) = next.schedules.get_mut(&state.schedule_selected) {
                schedule.meetings.clear();
                schedule.pushed_to_backend = false;
            }
        }
        Action::AddCartItem(section) => {
            if !contains_section(&next.cart_sections, &section.id) {
                next.cart_sections.push(section);
            }
            next.cart_pushed_to_backend = false;
        }
        Action::RemoveCartItem(id) => {
            next.cart_sections.retain(|s| s.id != id);
            next.cart_pushed_to_backend = false;
        }
        Action::MarkScheduleSynced { name, pushed } => {
            if name == CART_NAME {
                mark_cart_synced(&mut next, &pushed);
            } else if let Some(schedule) = next.schedules.get_mut(&name) {
                if has_exactly(&schedule.meetings, &pushed) {
                    schedule.pushed_to_backend = true;
                }
            }
        }
        Action::MarkCartSynced { pushed } => mark_cart_synced(&mut next, &pushed),
        Action::SetScheduleIdMarkSynced {
            name,
            id,
            pushed,
            creation,
        } => {
            if name == CART_NAME {
                next.cart_id = Some(id);
                mark_cart_synced(&mut next, &pushed);
            } else {
                stamp_created_schedule(&mut next, &name, id, &pushed, creation);
            }
        }
        Action::MarkCreationQueued { name, token } => {
            if let Some(schedule) = next.schedules.get_mut(&name) {
                schedule.backend_creation_state = Some(CreationState {
                    creation_queued: true,
                    token: Some(token),
                });
            }
        }
        Action::CreationFailed(token) => {
            let name = next.schedule_name_for_creation(token).map(str::to_owned);
            if let Some(schedule) = name.and_then(|name| next.schedules.get_mut(&name)) {
                schedule.backend_creation_state = Some(CreationState::default());
            }
        }
        Action::MarkDeletionQueued(id) => {
            if let Some(deletion) = next.deleted_schedules.get_mut(&id) {
                deletion.deletion_queued = true;
            }
        }
        Action::DeletionConfirmed(id) => {
            next.deleted_schedules.remove(&id);
        }
        Action::UpdateSchedules(records) => merge_backend_schedules(state, &mut next, &records),
    }
    next
}

fn mark_cart_synced(next: &mut ClientState, pushed: &[String]) {
    if has_exactly(&next.cart_sections, pushed) {
        next.cart_pushed_to_backend = true;
    }
}

/// Apply a create response. The schedule is looked up by creation token when
/// there is one, since it may have been renamed while the request was out.
fn stamp_created_schedule(
    next: &mut ClientState,
    sent_name: &str,
    id: ServerId,
    pushed: &[String],
    creation: Option<CreationToken>,
) {
    let target = match creation {
        Some(token) => next.schedule_name_for_creation(token).map(str::to_owned),
        None => next
            .schedules
            .contains_key(sent_name)
            .then(|| sent_name.to_string()),
    };

    let Some(target) = target else {
        if creation.is_some() {
            // Deleted while the create was in flight; the new record is an orphan.
            absorb_schedules_with_id(next, id, None);
            next.deleted_schedules.entry(id).or_default();
        }
        return;
    };

    let absorbed = absorb_schedules_with_id(next, id, Some(target.as_str()));
    if let Some(schedule) = next.schedules.get_mut(&target) {
        schedule.id = Some(id);
        schedule.backend_creation_state = None;
        if absorbed == 0 && target == sent_name && has_exactly(&schedule.meetings, pushed) {
            schedule.pushed_to_backend = true;
        }
    }
}

/// Remove every local schedule other than `keep` stamped with `id`. A pull
/// that landed before the create response materializes such a copy. Its
/// sections are folded into `keep`; returns how many were added.
fn absorb_schedules_with_id(next: &mut ClientState, id: ServerId, keep: Option<&str>) -> usize {
    let copies: Vec<String> = next
        .schedules
        .iter()
        .filter(|(name, schedule)| schedule.id == Some(id) && Some(name.as_str()) != keep)
        .map(|(name, _)| name.clone())
        .collect();

    let mut added = 0;
    for name in copies {
        let Some(copy) = next.schedules.remove(&name) else {
            continue;
        };
        if let Some(keep) = keep {
            if let Some(target) = next.schedules.get_mut(keep) {
                added += union_sections(&mut target.meetings, &copy.meetings);
                target.pushed_to_backend &= added == 0;
            }
            if next.schedule_selected == name {
                next.schedule_selected = keep.to_string();
            }
        }
    }
    next.repair_selection();
    added
}

fn remove_schedule(next: &mut ClientState, name: &str, queue_backend_deletion: bool) {
    let Some(removed) = next.schedules.remove(name) else {
        return;
    };
    if queue_backend_deletion {
        if let Some(id) = removed.id {
            next.deleted_schedules
                .entry(id)
                .or_insert_with(DeletionState::default);
        }
    }
    next.repair_selection();
}

/// Conflict policy: reject. Renaming onto a different existing name, or
/// renaming a name that does not exist, is a no-op.
fn rename_schedule(next: &mut ClientState, old_name: &str, new_name: String) {
    if old_name == new_name || next.schedules.contains_key(&new_name) {
        return;
    }
    let Some(mut schedule) = next.schedules.remove(old_name) else {
        return;
    };
    // The backend keys schedules by id, so the new name has to be pushed.
    schedule.pushed_to_backend = false;
    if next.schedule_selected == old_name {
        next.schedule_selected = new_name.clone();
    }
    next.schedules.insert(new_name, schedule);
}

/// Strip a trailing number from `name` and count up from it until the
/// result is unused: "Schedule" -> "Schedule1" -> "Schedule2". A suffix that
/// cannot count any higher is kept and a new number appended after it.
pub fn next_available_name(name: &str, used: &BTreeMap<String, Schedule>) -> String {
    if !used.contains_key(name) {
        return name.to_string();
    }
    let base = name.trim_end_matches(|c: char| c.is_ascii_digit());
    let start = name[base.len()..].parse().unwrap_or(0);
    first_unused(base, start, used)
        .or_else(|| first_unused(name, 0, used))
        .unwrap_or_else(|| format!("{name} copy"))
}

fn first_unused(base: &str, start: u64, used: &BTreeMap<String, Schedule>) -> Option<String> {
    let mut suffix = start;
    loop {
        suffix = suffix.checked_add(1)?;
        let candidate = format!("{base}{suffix}");
        if !used.contains_key(&candidate) {
            return Some(candidate);
        }
    }
}

/// Union backend schedules into local state.
///
/// Local sections are never dropped. A local schedule that differs from its
/// backend copy after the merge is marked dirty so the union gets pushed.
fn merge_backend_schedules(
    state: &ClientState,
    next: &mut ClientState,
    records: &[BackendSchedule],
) {
    let mut cart_changed = false;

    for record in records {
        if record.name == CART_NAME {
            next.cart_id = Some(record.id);
            if union_sections(&mut next.cart_sections, &record.sections) > 0 {
                cart_changed = true;
            }
            continue;
        }

        // Deleted here, delete still pending upstream.
        if next.deleted_schedules.contains_key(&record.id) {
            continue;
        }

        let local_name = if next.schedules.contains_key(&record.name) {
            Some(record.name.clone())
        } else {
            // Renamed locally, new name not pushed yet.
            next.schedule_name_for_id(record.id).map(str::to_owned)
        };

        match local_name.and_then(|name| next.schedules.get_mut(&name)) {
            Some(schedule) => {
                let id_changed = schedule.id != Some(record.id);
                schedule.id = Some(record.id);
                let added = union_sections(&mut schedule.meetings, &record.sections);
                let local_only = schedule
                    .meetings
                    .iter()
                    .any(|m| !contains_section(&record.sections, &m.id));
                if id_changed || added > 0 || local_only {
                    schedule.pushed_to_backend = false;
                }
            }
            None => {
                next.schedules
                    .insert(record.name.clone(), Schedule::from_backend(record));
            }
        }
    }

    next.cart_pushed_to_backend = state.cart_pushed_to_backend && !cart_changed;
}
