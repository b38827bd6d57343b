use std::sync::Arc;
use std::time::Duration;

use courseplan_sync::config::SyncConfig;
use courseplan_sync::gateway::MemoryGateway;
use courseplan_sync::models::{ClientState, Section, CART_NAME, DEFAULT_SCHEDULE_NAME};
use courseplan_sync::storage::{
    LocalStorage, PlanStorage, OBSERVED_SCHEDULES_KEY, SCHEDULES_KEY, USES_BACKEND_SYNC_KEY,
};
use courseplan_sync::{Action, PlannerSession};

fn sync_every(interval_ms: u64) -> SyncConfig {
    SyncConfig {
        enabled: true,
        interval_ms,
    }
}

fn section_ids(sections: &[Section]) -> Vec<&str> {
    sections.iter().map(|s| s.id.as_str()).collect()
}

#[tokio::test]
async fn local_only_session_persists_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local_storage.json");
    let config = SyncConfig {
        enabled: false,
        ..SyncConfig::default()
    };
    let gateway = Arc::new(MemoryGateway::new());

    let session = PlannerSession::start(
        Arc::new(LocalStorage::open(&path).unwrap()),
        gateway.clone(),
        &config,
    )
    .await
    .unwrap();
    assert!(!session.is_syncing());
    assert!(session.tab_token().is_none());
    session.dispatch(Action::CreateSchedule("Fall".into())).await;
    session
        .dispatch(Action::ToggleSectionInSelected(Section::new("CIS-120-001")))
        .await;
    session.dispatch(Action::AddCartItem(Section::new("MATH-104-001"))).await;
    session.shutdown().await.unwrap();

    let session = PlannerSession::start(
        Arc::new(LocalStorage::open(&path).unwrap()),
        gateway.clone(),
        &config,
    )
    .await
    .unwrap();
    let state = session.snapshot().await;
    assert_eq!(state.schedule_selected, "Fall");
    assert_eq!(section_ids(&state.schedules["Fall"].meetings), vec!["CIS-120-001"]);
    assert_eq!(section_ids(&state.cart_sections), vec!["MATH-104-001"]);
    assert!(gateway.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn local_edits_reach_the_backend() {
    let storage = Arc::new(LocalStorage::in_memory());
    let gateway = Arc::new(MemoryGateway::new());
    let session = PlannerSession::start(storage.clone(), gateway.clone(), &sync_every(100))
        .await
        .unwrap();
    assert!(session.is_syncing());

    session.dispatch(Action::CreateSchedule("Midterm".into())).await;
    session
        .dispatch(Action::ToggleSectionInSelected(Section::new("CIS-160-001")))
        .await;
    session.dispatch(Action::AddCartItem(Section::new("CIS-121-001"))).await;
    tokio::time::sleep(Duration::from_millis(350)).await;

    let remote = gateway.schedule_named("Midterm").expect("Midterm was not created");
    assert_eq!(section_ids(&remote.sections), vec!["CIS-160-001"]);
    let cart = gateway.schedule_named(CART_NAME).expect("cart was not created");
    assert_eq!(section_ids(&cart.sections), vec!["CIS-121-001"]);

    let state = session.shutdown().await.unwrap();
    assert_eq!(state.schedules["Midterm"].id, Some(remote.id));
    assert!(state.schedules["Midterm"].pushed_to_backend);
    assert_eq!(state.cart_id, Some(cart.id));
    assert!(state.cart_pushed_to_backend);
}

#[tokio::test(start_paused = true)]
async fn changes_flow_between_devices() {
    let gateway = Arc::new(MemoryGateway::new());
    let laptop = PlannerSession::start(
        Arc::new(LocalStorage::in_memory()),
        gateway.clone(),
        &sync_every(100),
    )
    .await
    .unwrap();
    laptop.dispatch(Action::CreateSchedule("Shared".into())).await;
    laptop
        .dispatch(Action::ToggleSectionInSelected(Section::new("s1")))
        .await;
    tokio::time::sleep(Duration::from_millis(350)).await;

    let phone = PlannerSession::start(
        Arc::new(LocalStorage::in_memory()),
        gateway.clone(),
        &sync_every(100),
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    let shared = &phone.snapshot().await.schedules["Shared"];
    assert_eq!(section_ids(&shared.meetings), vec!["s1"]);

    laptop.dispatch(Action::DeleteSchedule("Shared".into())).await;
    tokio::time::sleep(Duration::from_millis(350)).await;

    assert!(gateway.schedule_named("Shared").is_none());
    let phone_state = phone.shutdown().await.unwrap();
    assert!(!phone_state.schedules.contains_key("Shared"));
    assert!(phone_state.schedules.contains_key(DEFAULT_SCHEDULE_NAME));
    let laptop_state = laptop.shutdown().await.unwrap();
    assert!(laptop_state.deleted_schedules.is_empty());
}

#[tokio::test]
async fn second_session_on_same_storage_yields() {
    let storage = LocalStorage::in_memory();
    let gateway = Arc::new(MemoryGateway::new());

    let first = PlannerSession::start(
        Arc::new(storage.new_handle()),
        gateway.clone(),
        &sync_every(50),
    )
    .await
    .unwrap();
    let second = PlannerSession::start(
        Arc::new(storage.new_handle()),
        gateway.clone(),
        &sync_every(50),
    )
    .await
    .unwrap();

    let mut yielded = second.shutdown_signal();
    tokio::time::timeout(Duration::from_secs(2), yielded.wait_for(|stopped| *stopped))
        .await
        .expect("second session kept syncing")
        .unwrap();
    assert!(!second.is_syncing());
    assert!(first.is_syncing());

    second.shutdown().await.unwrap();
    first.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_stops_mirroring() {
    let storage = Arc::new(LocalStorage::in_memory());
    let session = PlannerSession::start(
        storage.clone(),
        Arc::new(MemoryGateway::new()),
        &sync_every(50),
    )
    .await
    .unwrap();
    session.dispatch(Action::CreateSchedule("Kept".into())).await;
    let store = Arc::clone(session.store());
    session.shutdown().await.unwrap();
    let persisted = storage.get(SCHEDULES_KEY).await.unwrap().unwrap();

    store.dispatch(Action::CreateSchedule("Lost".into())).await;

    assert_eq!(storage.get(SCHEDULES_KEY).await.unwrap().unwrap(), persisted);
    assert!(persisted.contains("Kept"));
    assert!(!persisted.contains("Lost"));
}

#[tokio::test(start_paused = true)]
async fn reset_starts_over_as_a_fresh_install() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local_storage.json");
    let gateway = Arc::new(MemoryGateway::new());

    let session = PlannerSession::start(
        Arc::new(LocalStorage::open(&path).unwrap()),
        gateway.clone(),
        &sync_every(50),
    )
    .await
    .unwrap();
    session.dispatch(Action::CreateSchedule("Fall".into())).await;
    session.dispatch(Action::AddCartItem(Section::new("MATH-104-001"))).await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    session.shutdown().await.unwrap();

    let storage = LocalStorage::open(&path).unwrap();
    assert!(storage.get(USES_BACKEND_SYNC_KEY).await.unwrap().is_some());
    PlannerSession::reset(&storage).await.unwrap();
    for key in [SCHEDULES_KEY, OBSERVED_SCHEDULES_KEY, USES_BACKEND_SYNC_KEY] {
        assert_eq!(storage.get(key).await.unwrap(), None);
    }

    let config = SyncConfig {
        enabled: false,
        ..SyncConfig::default()
    };
    let session = PlannerSession::start(
        Arc::new(LocalStorage::open(&path).unwrap()),
        gateway,
        &config,
    )
    .await
    .unwrap();
    assert_eq!(session.snapshot().await, ClientState::default());
}
