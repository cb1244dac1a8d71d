//! RealtimeChannel behaviour over the in-process hub

mod common;

use std::sync::Arc;
use std::time::Duration;

use rollcall_attendance_core::channel::ClientMessage;
use rollcall_attendance_core::{
    ActivityId, AttendanceError, AttendanceUpdate, ChannelStatus, ClientEvent, EventPublisher,
    MemoryHub, RealtimeChannel, ReconnectPolicy,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

use common::{eventually, init_tracing, within};

fn steady_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(500),
        min_interval: Duration::from_millis(100),
        backoff_multiplier: 2.0,
        use_jitter: false,
    }
}

async fn wait_for_status(channel: &RealtimeChannel, wanted: ChannelStatus) {
    within(channel.status_watch().wait_for(|status| *status == wanted))
        .await
        .expect("status watch open");
}

#[tokio::test]
async fn delivers_updates_to_subscribers_of_that_activity() {
    init_tracing();
    let hub = MemoryHub::new();
    let channel = RealtimeChannel::new(Arc::new(hub.transport()), ReconnectPolicy::quick());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let _subscription = channel.subscribe(&ActivityId::from("e1"), move |update: AttendanceUpdate| {
        let _ = tx.send(update);
    });
    channel.connect();
    wait_for_status(&channel, ChannelStatus::Connected).await;

    hub.broadcast(AttendanceUpdate::new("e2", 1));
    hub.broadcast(AttendanceUpdate::new("e1", 7));
    hub.broadcast(AttendanceUpdate::new("e1", 6));

    assert_eq!(within(rx.recv()).await, Some(AttendanceUpdate::new("e1", 7)));
    assert_eq!(within(rx.recv()).await, Some(AttendanceUpdate::new("e1", 6)));
    channel.disconnect().await;
}

#[tokio::test]
async fn unsubscribed_handlers_stop_receiving() {
    let hub = MemoryHub::new();
    let channel = RealtimeChannel::new(Arc::new(hub.transport()), ReconnectPolicy::quick());
    let (kept_tx, mut kept_rx) = mpsc::unbounded_channel();
    let (dropped_tx, mut dropped_rx) = mpsc::unbounded_channel();
    let id = ActivityId::from("e1");

    let _kept = channel.subscribe(&id, move |update: AttendanceUpdate| {
        let _ = kept_tx.send(update);
    });
    let dropped = channel.subscribe(&id, move |update: AttendanceUpdate| {
        let _ = dropped_tx.send(update);
    });
    dropped.unsubscribe();

    channel.connect();
    wait_for_status(&channel, ChannelStatus::Connected).await;
    hub.broadcast(AttendanceUpdate::new("e1", 3));

    assert_eq!(within(kept_rx.recv()).await, Some(AttendanceUpdate::new("e1", 3)));
    assert!(dropped_rx.try_recv().is_err());
}

#[tokio::test]
async fn malformed_and_unknown_frames_are_skipped() {
    let hub = MemoryHub::new();
    let channel = RealtimeChannel::new(Arc::new(hub.transport()), ReconnectPolicy::quick());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = channel.subscribe(&ActivityId::from("e1"), move |update: AttendanceUpdate| {
        let _ = tx.send(update);
    });

    channel.connect();
    wait_for_status(&channel, ChannelStatus::Connected).await;

    hub.send_raw("{\"event\":");
    hub.send_raw(r#"{"event":"presence","who":"someone"}"#);
    hub.broadcast(AttendanceUpdate::new("e1", 4));

    assert_eq!(within(rx.recv()).await, Some(AttendanceUpdate::new("e1", 4)));
    assert_eq!(channel.status(), ChannelStatus::Connected);
    assert_eq!(hub.connect_attempts(), 1);
}

#[tokio::test]
async fn delivery_scope_is_replayed_after_reconnect() {
    let hub = MemoryHub::new();
    let channel = RealtimeChannel::new(Arc::new(hub.transport()), ReconnectPolicy::quick());
    let e1 = ActivityId::from("e1");
    let e2 = ActivityId::from("e2");

    channel.notify_attach(&e1);
    channel.connect();
    wait_for_status(&channel, ChannelStatus::Connected).await;
    channel.notify_attach(&e2);
    channel.notify_attach(&e2);
    eventually("both ids sent", || hub.received().len() == 2).await;

    hub.drop_connections();
    eventually("reconnected with replay", || hub.received().len() == 4).await;

    assert_eq!(
        hub.received(),
        vec![
            ClientMessage::attach(&e1),
            ClientMessage::attach(&e2),
            ClientMessage::attach(&e1),
            ClientMessage::attach(&e2),
        ]
    );
    assert_eq!(hub.connect_attempts(), 2);
    wait_for_status(&channel, ChannelStatus::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn reconnects_never_faster_than_min_interval_and_degrade() {
    let hub = MemoryHub::new();
    hub.set_offline(true);
    let channel = RealtimeChannel::new(Arc::new(hub.transport()), steady_policy(3));

    let started = Instant::now();
    channel.connect();
    wait_for_status(&channel, ChannelStatus::Degraded).await;

    // first attempt plus three retries, each retry at least 100ms apart
    assert_eq!(hub.connect_attempts(), 4);
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(matches!(
        channel.check_fresh(),
        Err(AttendanceError::TransportUnavailable { .. })
    ));

    // degraded stays put without a manual reset
    hub.set_offline(false);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(channel.status(), ChannelStatus::Degraded);
    assert_eq!(hub.connect_attempts(), 4);

    channel.reset().await;
    wait_for_status(&channel, ChannelStatus::Connected).await;
    assert!(channel.check_fresh().is_ok());
}

#[tokio::test(start_paused = true)]
async fn transient_refusals_recover_within_budget() {
    let hub = MemoryHub::new();
    hub.refuse_connections(2);
    let channel = RealtimeChannel::new(Arc::new(hub.transport()), steady_policy(3));

    channel.connect();
    wait_for_status(&channel, ChannelStatus::Connected).await;
    assert_eq!(hub.connect_attempts(), 3);

    // the loss plus two refusals only fits the budget if it was restored
    hub.drop_connections();
    hub.refuse_connections(2);
    wait_for_status(&channel, ChannelStatus::Reconnecting { attempt: 3 }).await;
    wait_for_status(&channel, ChannelStatus::Connected).await;
    assert_eq!(hub.connect_attempts(), 6);
}

#[tokio::test]
async fn status_changes_are_published_as_events() {
    let hub = MemoryHub::new();
    let events = EventPublisher::default();
    let mut rx = events.subscribe();
    let channel = RealtimeChannel::new(Arc::new(hub.transport()), ReconnectPolicy::quick())
        .with_events(events);

    channel.connect();
    wait_for_status(&channel, ChannelStatus::Connected).await;
    channel.disconnect().await;

    let mut statuses = Vec::new();
    while let Ok(ClientEvent::ChannelStatusChanged { status }) = rx.try_recv() {
        statuses.push(status);
    }
    assert_eq!(
        statuses,
        vec![
            ChannelStatus::Connecting,
            ChannelStatus::Connected,
            ChannelStatus::Closed,
        ]
    );
    assert_eq!(hub.connection_count(), 0);
}

#[tokio::test]
async fn connect_is_idempotent_while_running() {
    let hub = MemoryHub::new();
    let channel = RealtimeChannel::new(Arc::new(hub.transport()), ReconnectPolicy::quick());

    channel.connect();
    channel.connect();
    wait_for_status(&channel, ChannelStatus::Connected).await;
    channel.connect();

    assert_eq!(hub.connection_count(), 1);
    assert_eq!(hub.connect_attempts(), 1);
}
