//! End-to-end attendance flows against an in-process server and hub

mod common;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rollcall_attendance_core::{
    Activity, ActivityId, AttachmentPhase, AttendanceClient, AttendanceConfig, AttendanceError,
    ChannelStatus, ClientBuilder, ClientEvent, LifecycleSignal, MemoryHub, ReconnectPolicy,
    Session, SessionStore,
};

use common::{eventually, init_tracing, within, FakeServer, Journal, JournalingStore};

struct Harness {
    client: Arc<AttendanceClient>,
    server: Arc<FakeServer>,
    store: Arc<JournalingStore>,
    journal: Journal,
    hub: MemoryHub,
}

fn sample_activities() -> Vec<Activity> {
    vec![
        Activity::new("a", "Morning run", "2026-10-18T07:00:00Z")
            .with_category("Sport")
            .with_attendee_count(5)
            .with_owner("user-1"),
        Activity::new("b", "Book club", "2026-10-20T18:00:00Z")
            .with_category("Reading")
            .with_attendee_count(2)
            .with_owner("user-2"),
        Activity::new("c", "Jam session", "2026-10-18T21:00:00Z")
            .with_category("Music")
            .with_attendee_count(8)
            .with_owner("user-1"),
        Activity::new("d", "Market", "2026-10-01").with_attendee_count(1),
    ]
}

async fn harness_with(store: JournalingStore, journal: Journal) -> Harness {
    init_tracing();
    let hub = MemoryHub::new();
    let server = Arc::new(FakeServer::new(hub.clone(), sample_activities(), journal.clone()));
    let store = Arc::new(store);

    let client = ClientBuilder::new()
        .config(AttendanceConfig::new().with_reconnect(ReconnectPolicy::quick()))
        .with_store(store.clone())
        .with_api(server.clone())
        .with_transport(Arc::new(hub.transport()))
        .build()
        .await
        .expect("client builds");

    Harness {
        client,
        server,
        store,
        journal,
        hub,
    }
}

async fn harness() -> Harness {
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    harness_with(JournalingStore::new(journal.clone()), journal).await
}

async fn connected(client: &AttendanceClient) {
    client.start();
    within(
        client
            .channel()
            .status_watch()
            .wait_for(|status| *status == ChannelStatus::Connected),
    )
    .await
    .expect("channel connected");
}

fn id(raw: &str) -> ActivityId {
    ActivityId::from(raw)
}

#[tokio::test]
async fn join_reject_leave_then_guest_termination() {
    let h = harness().await;
    connected(&h.client).await;
    h.client.login_guest().await.unwrap();
    h.client.refresh_activities().await.unwrap();

    // attach A: 5 -> 6
    assert_eq!(h.client.join(&id("a")).await.unwrap(), 6);
    assert_eq!(h.client.attendee_count(&id("a")), Some(6));

    // attach B while attached to A is rejected without a request
    let requests_before = h.server.requests().len();
    let err = h.client.join(&id("b")).await.unwrap_err();
    assert!(matches!(err, AttendanceError::AlreadyAttached { .. }));
    assert_eq!(h.server.requests().len(), requests_before);
    assert_eq!(h.client.attendee_count(&id("a")), Some(6));

    // detach: 6 -> 5
    assert_eq!(h.client.leave().await.unwrap(), Some(5));
    assert_eq!(h.client.attendee_count(&id("a")), Some(5));

    // guest attached to C at 9, then the page goes away
    assert_eq!(h.client.join(&id("c")).await.unwrap(), 9);
    h.journal.lock().clear();

    h.client.signals().emit(LifecycleSignal::BeforeUnload);
    h.client.signals().emit(LifecycleSignal::Unload);

    eventually("termination detach", || h.server.count(&id("c")) == 8).await;
    assert_eq!(h.client.attendee_count(&id("c")), Some(8));
    assert_eq!(h.store.load().unwrap().unwrap().attached_activity_id, None);

    // persisted attachment cleared before the single detach request
    let journal = h.journal.lock().clone();
    assert_eq!(journal, vec!["save:none".to_string(), "detach:c".to_string()]);
}

#[tokio::test]
async fn broadcasts_from_other_clients_update_counts() {
    let h = harness().await;
    connected(&h.client).await;
    h.client.login_guest().await.unwrap();
    h.client.refresh_activities().await.unwrap();

    eventually("delivery scope sent", || h.hub.received().len() == 4).await;
    h.hub.broadcast(rollcall_attendance_core::AttendanceUpdate::new("b", 12));

    eventually("broadcast applied", || h.client.attendee_count(&id("b")) == Some(12)).await;
    assert!(h.client.counts_fresh().is_ok());
}

#[tokio::test]
async fn failed_join_rolls_back_and_reports() {
    let h = harness().await;
    h.client.login_guest().await.unwrap();
    h.client.refresh_activities().await.unwrap();
    let mut events = h.client.subscribe_events();

    h.server.set_failing(true);
    let err = h.client.join(&id("a")).await.unwrap_err();
    assert!(matches!(err, AttendanceError::RequestFailed { .. }));
    assert_eq!(h.client.attendee_count(&id("a")), Some(5));
    assert_eq!(h.client.phase(), AttachmentPhase::Detached);
    assert_eq!(h.store.load().unwrap().unwrap().attached_activity_id, None);

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if let ClientEvent::AttachmentFailed { activity_id, .. } = event {
            assert_eq!(activity_id, id("a"));
            saw_failure = true;
        }
    }
    assert!(saw_failure);

    // no residual lock after a failure
    h.server.set_failing(false);
    assert_eq!(h.client.join(&id("b")).await.unwrap(), 3);
}

#[tokio::test]
async fn logout_detaches_unregisters_and_clears() {
    let h = harness().await;
    h.client.login_guest().await.unwrap();
    h.client.refresh_activities().await.unwrap();
    h.client.join(&id("a")).await.unwrap();
    assert!(h.client.guard().is_registered());

    h.client.logout().await.unwrap();

    assert_eq!(h.server.count(&id("a")), 5);
    assert!(!h.client.guard().is_registered());
    assert_eq!(h.store.load().unwrap(), None);
    assert_eq!(h.client.session(), None);

    // termination after logout has nothing to release
    assert!(h.client.guard().handle(LifecycleSignal::Unload).is_none());
    assert!(matches!(
        h.client.join(&id("a")).await,
        Err(AttendanceError::NoSession)
    ));
}

#[tokio::test]
async fn guest_login_reuses_persisted_session() {
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    let mut persisted = Session::guest();
    persisted.attached_activity_id = Some(id("c"));
    let h = harness_with(JournalingStore::seeded(&persisted, journal.clone()), journal).await;

    let session = h.client.login_guest().await.unwrap();
    assert_eq!(session.identity, persisted.identity);
    assert_eq!(session.attached_activity_id, Some(id("c")));
    assert!(h.client.guard().is_registered());

    h.client.refresh_activities().await.unwrap();
    let err = h.client.join(&id("a")).await.unwrap_err();
    assert!(matches!(err, AttendanceError::AlreadyAttached { current, .. } if current == id("c")));
}

#[tokio::test]
async fn members_see_owned_activities_and_survive_termination() -> anyhow::Result<()> {
    let h = harness().await;
    h.client.login_member("user-1").await?;
    h.client.refresh_activities().await?;

    let ids: Vec<ActivityId> = h.client.activities().into_iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![id("a"), id("c")]);

    h.client.join(&id("a")).await?;
    assert!(h.client.guard().handle(LifecycleSignal::BeforeUnload).is_none());
    assert_eq!(h.client.controller().attached_activity(), Some(id("a")));
    assert_eq!(h.server.count(&id("a")), 6);
    Ok(())
}

#[tokio::test]
async fn switching_role_releases_previous_attachment() {
    let h = harness().await;
    h.client.login_guest().await.unwrap();
    h.client.refresh_activities().await.unwrap();
    h.client.join(&id("b")).await.unwrap();

    let member = h.client.login_member("user-2").await.unwrap();
    assert_eq!(member.attached_activity_id, None);
    assert_eq!(h.server.count(&id("b")), 2);
    assert_eq!(
        h.store.load().unwrap().map(|session| session.identity),
        Some("user-2".to_string())
    );
}

#[tokio::test]
async fn view_classifies_and_filters_live_counts() {
    let h = harness().await;
    h.client.login_guest().await.unwrap();
    h.client.refresh_activities().await.unwrap();
    h.client.join(&id("c")).await.unwrap();

    let now: DateTime<Utc> = "2026-10-18T12:00:00Z".parse().unwrap();
    let view = h.client.view(&now);
    assert_eq!(view.active.len(), 2);
    assert_eq!(view.future.len(), 1);
    assert_eq!(view.past.len(), 1);
    let jam = view.active.iter().find(|dated| dated.activity.id == id("c")).unwrap();
    assert_eq!(jam.activity.attendee_count, 9);

    h.client.set_category_filter(Some("Music".to_string()));
    assert_eq!(h.client.view(&now).len(), 1);

    h.client.set_day_filter(NaiveDate::from_ymd_opt(2026, 10, 20));
    assert!(h.client.view(&now).is_empty());

    h.client.clear_filters();
    assert_eq!(h.client.view(&now).len(), 4);
    assert_eq!(
        h.client.categories(),
        vec!["Sport", "Reading", "Music", "Uncategorized"]
    );
}
