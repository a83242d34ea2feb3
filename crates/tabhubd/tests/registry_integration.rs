//! Integration tests for the hub registry.
//!
//! Sessions run over in-memory duplex pipes; the test holds the client end
//! and talks line-delimited JSON to the session pumps.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.
//! We test the panic-free behavior of production code through assertions.

use std::sync::Arc;
use std::time::Duration;

use tabhub_core::{Event, PresenceError, PresenceMediator, SessionId, UserId};
use tabhubd::config::{HubConfig, TakeoverPolicy};
use tabhubd::presence::{channel_presence, PresenceUpdate};
use tabhubd::registry::{spawn_hub, HubEvent, HubHandle, RegistryError, RemovalReason};
use tabhubd::session::Session;
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};

// ============================================================================
// Test Helpers
// ============================================================================

const WAIT: Duration = Duration::from_secs(2);

type Client = BufReader<DuplexStream>;

/// Hub wired to a channel mediator so tests can read the transitions.
fn spawn_test_hub(config: HubConfig) -> (HubHandle, mpsc::UnboundedReceiver<PresenceUpdate>) {
    let (presence, rx) = channel_presence();
    (spawn_hub(config, Arc::new(presence)), rx)
}

async fn connect(hub: &HubHandle, user: &str, tab: &str) -> (tabhubd::session::SessionHandle, Client) {
    let (client, server) = duplex(64 * 1024);
    let handle = hub
        .connect(SessionId::new(user, tab), server)
        .await
        .expect("register should succeed");
    (handle, BufReader::new(client))
}

fn drain(rx: &mut mpsc::UnboundedReceiver<PresenceUpdate>) -> Vec<PresenceUpdate> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}

/// Polls `condition` until it holds or the wait budget runs out.
async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

async fn send_line(client: &mut Client, line: &str) {
    client.write_all(line.as_bytes()).await.unwrap();
    client.write_all(b"\n").await.unwrap();
    client.flush().await.unwrap();
}

async fn read_line(client: &mut Client) -> Option<String> {
    let mut line = String::new();
    let n = timeout(WAIT, client.read_line(&mut line))
        .await
        .expect("read timed out")
        .unwrap_or(0);
    (n > 0).then(|| line.trim_end().to_string())
}

async fn next_removal(events: &mut broadcast::Receiver<HubEvent>) -> (SessionId, RemovalReason) {
    timeout(WAIT, async {
        loop {
            if let HubEvent::SessionRemoved {
                session_id, reason, ..
            } = events.recv().await.unwrap()
            {
                return (session_id, reason);
            }
        }
    })
    .await
    .expect("no removal event")
}

fn online(user: &str) -> PresenceUpdate {
    PresenceUpdate::Online(UserId::from(user))
}

fn offline(user: &str) -> PresenceUpdate {
    PresenceUpdate::Offline(UserId::from(user))
}

fn stats_event(user: &str) -> Event {
    Event::UserStatsUpdated(tabhub_core::StatsPayload {
        user_id: UserId::from(user),
        stats_type: "followers".to_string(),
        count: 3,
    })
}

/// Mediator whose store is always down.
struct FailingPresence;

impl PresenceMediator for FailingPresence {
    fn mark_online(&self, _user_id: &UserId) -> Result<(), PresenceError> {
        Err(PresenceError::Unavailable("store down".to_string()))
    }

    fn mark_offline(&self, _user_id: &UserId) -> Result<(), PresenceError> {
        Err(PresenceError::Unavailable("store down".to_string()))
    }
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_register_marks_online_and_delivers() {
    let (hub, mut presence) = spawn_test_hub(HubConfig::default());
    let alice = UserId::from("alice");

    let (_session, mut client) = connect(&hub, "alice", "t1").await;

    assert_eq!(drain(&mut presence), vec![online("alice")]);
    assert!(hub.is_online(&alice).await.unwrap());
    assert!(hub.has_session(&SessionId::new("alice", "t1")));
    assert_eq!(hub.active_session_count(&alice), 1);

    let event = stats_event("alice");
    assert_eq!(hub.broadcast_to_user(&alice, &event), 1);

    let line = read_line(&mut client).await.expect("event line");
    assert_eq!(line, event.to_json().unwrap());
}

#[tokio::test]
async fn test_takeover_closes_prior_session_without_presence_flap() {
    let (hub, mut presence) = spawn_test_hub(HubConfig::default());
    let mut events = hub.subscribe();
    let alice = UserId::from("alice");

    let (first, mut first_client) = connect(&hub, "alice", "t1").await;
    let (_second, mut second_client) = connect(&hub, "alice", "t2").await;

    let (removed, reason) = next_removal(&mut events).await;
    assert_eq!(removed, SessionId::new("alice", "t1"));
    assert_eq!(reason, RemovalReason::Takeover);

    timeout(WAIT, first.finished()).await.expect("old pumps stop");
    assert_eq!(read_line(&mut first_client).await, None);

    assert_eq!(hub.session_count(), 1);
    assert!(hub.has_session(&SessionId::new("alice", "t2")));
    assert!(!hub.has_session(&SessionId::new("alice", "t1")));
    assert!(hub.check_consistency());

    // Only the new session receives.
    assert_eq!(hub.broadcast_to_user(&alice, &stats_event("alice")), 1);
    assert!(read_line(&mut second_client).await.is_some());

    // The old driver's late unregister must not flip presence.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(drain(&mut presence), vec![online("alice")]);
    assert!(hub.is_online(&alice).await.unwrap());
}

#[tokio::test]
async fn test_disconnect_marks_offline() {
    let (hub, mut presence) = spawn_test_hub(HubConfig::default());
    let alice = UserId::from("alice");

    let (_session, client) = connect(&hub, "alice", "t1").await;
    drop(client);

    eventually(|| hub.session_count() == 0).await;
    assert!(!hub.has_active_session(&alice));
    assert!(!hub.is_online(&alice).await.unwrap());
    assert_eq!(drain(&mut presence), vec![online("alice"), offline("alice")]);
}

#[tokio::test]
async fn test_close_frame_unregisters() {
    let (hub, _presence) = spawn_test_hub(HubConfig::default());

    let (session, mut client) = connect(&hub, "alice", "t1").await;
    send_line(&mut client, r#"{"type":"close"}"#).await;

    timeout(WAIT, session.finished()).await.expect("pumps stop");
    eventually(|| hub.session_count() == 0).await;
}

#[tokio::test]
async fn test_unregister_is_idempotent() {
    let (hub, mut presence) = spawn_test_hub(HubConfig::default());

    let (session, _client) = connect(&hub, "alice", "t1").await;
    assert!(hub.unregister(session.connection_id()).await.unwrap());
    assert!(!hub.unregister(session.connection_id()).await.unwrap());

    // The driver's own unregister after the pumps stop is a no-op too.
    timeout(WAIT, session.finished()).await.expect("pumps stop");
    sleep(Duration::from_millis(20)).await;

    assert_eq!(drain(&mut presence), vec![online("alice"), offline("alice")]);
    assert!(hub.check_consistency());
}

#[tokio::test]
async fn test_register_closed_session_is_rejected() {
    let (hub, mut presence) = spawn_test_hub(HubConfig::default());
    let (_client, server) = duplex(1024);

    let session = Session::new(SessionId::new("alice", "t1"), server, 4);
    session.handle().close();

    let err = hub.register(session).await.unwrap_err();
    assert_eq!(err, RegistryError::SessionClosed(SessionId::new("alice", "t1")));
    assert_eq!(hub.session_count(), 0);
    assert!(drain(&mut presence).is_empty());
}

// ============================================================================
// Activity Tests
// ============================================================================

#[tokio::test]
async fn test_user_away_and_back() {
    let (hub, mut presence) = spawn_test_hub(HubConfig::default());
    let alice = UserId::from("alice");

    let (_session, mut client) = connect(&hub, "alice", "t1").await;
    drain(&mut presence);

    send_line(&mut client, r#"{"type":"user_away"}"#).await;
    eventually(|| !hub.has_active_session(&alice)).await;
    assert_eq!(hub.broadcast_to_user(&alice, &stats_event("alice")), 0);
    assert_eq!(hub.session_count(), 1);

    send_line(&mut client, r#"{"type":"user_active"}"#).await;
    eventually(|| hub.has_active_session(&alice)).await;

    assert_eq!(drain(&mut presence), vec![offline("alice"), online("alice")]);
}

#[tokio::test]
async fn test_repeated_activity_is_edge_triggered() {
    let (hub, mut presence) = spawn_test_hub(HubConfig::default());
    let alice = UserId::from("alice");

    let (_session, mut client) = connect(&hub, "alice", "t1").await;
    send_line(&mut client, r#"{"type":"user_active"}"#).await;
    send_line(&mut client, r#"{"type":"user_away"}"#).await;
    send_line(&mut client, r#"{"type":"user_away"}"#).await;
    eventually(|| !hub.has_active_session(&alice)).await;

    // Ping round trip proves every earlier frame was processed.
    send_line(&mut client, r#"{"type":"ping"}"#).await;
    assert_eq!(read_line(&mut client).await.as_deref(), Some(r#"{"type":"pong"}"#));
    sleep(Duration::from_millis(20)).await;

    assert_eq!(drain(&mut presence), vec![online("alice"), offline("alice")]);
}

#[tokio::test]
async fn test_same_tab_policy_keeps_other_tabs() {
    let config = HubConfig {
        takeover: TakeoverPolicy::SameTab,
        ..HubConfig::default()
    };
    let (hub, mut presence) = spawn_test_hub(config);
    let mut events = hub.subscribe();
    let alice = UserId::from("alice");

    let (_t1, mut t1_client) = connect(&hub, "alice", "t1").await;
    let (t2, _t2_client) = connect(&hub, "alice", "t2").await;
    assert_eq!(hub.session_count(), 2);

    // Reconnecting the same tab replaces only that tab.
    let (_t2b, _t2b_client) = connect(&hub, "alice", "t2").await;
    let (removed, reason) = next_removal(&mut events).await;
    assert_eq!(removed, SessionId::new("alice", "t2"));
    assert_eq!(reason, RemovalReason::Takeover);
    timeout(WAIT, t2.finished()).await.expect("old tab stops");
    assert_eq!(hub.session_count(), 2);

    // Activating t1 closes the other active tab.
    send_line(&mut t1_client, r#"{"type":"user_active"}"#).await;
    let (removed, reason) = next_removal(&mut events).await;
    assert_eq!(removed, SessionId::new("alice", "t2"));
    assert_eq!(reason, RemovalReason::SiblingActivated);

    eventually(|| hub.session_count() == 1).await;
    assert_eq!(hub.active_session_count(&alice), 1);
    assert!(hub.has_session(&SessionId::new("alice", "t1")));
    assert_eq!(drain(&mut presence), vec![online("alice")]);
}

// ============================================================================
// Broadcast Tests
// ============================================================================

#[tokio::test]
async fn test_broadcast_to_unknown_user_is_noop() {
    let (hub, _presence) = spawn_test_hub(HubConfig::default());
    assert_eq!(hub.broadcast_to_user(&UserId::from("nobody"), &stats_event("x")), 0);
}

#[tokio::test]
async fn test_broadcast_all_includes_inactive_sessions() {
    let (hub, _presence) = spawn_test_hub(HubConfig::default());
    let bob = UserId::from("bob");

    let (_a, mut alice_client) = connect(&hub, "alice", "t1").await;
    let (_b, mut bob_client) = connect(&hub, "bob", "t1").await;

    send_line(&mut bob_client, r#"{"type":"user_away"}"#).await;
    eventually(|| !hub.has_active_session(&bob)).await;

    let event = Event::user_status(UserId::from("carol"), true);
    assert_eq!(hub.broadcast_all(&event), 2);
    assert!(read_line(&mut alice_client).await.is_some());
    assert!(read_line(&mut bob_client).await.is_some());

    assert_eq!(hub.broadcast_all_except(&bob, &event), 1);
}

#[tokio::test]
async fn test_full_queue_drops_without_blocking() {
    let config = HubConfig {
        queue_capacity: 1,
        ..HubConfig::default()
    };
    let (hub, _presence) = spawn_test_hub(config);
    let alice = UserId::from("alice");

    // Tiny pipe that nobody reads, so the write pump stalls.
    let (_client, server) = duplex(32);
    hub.connect(SessionId::new("alice", "t1"), server).await.unwrap();

    let event = stats_event("alice");
    let delivered: usize = (0..100).map(|_| hub.broadcast_to_user(&alice, &event)).sum();

    assert!(delivered < 100, "some events must be dropped, got {delivered}");
    assert_eq!(hub.session_count(), 1);
}

#[tokio::test]
async fn test_write_timeout_tears_down_session() {
    let config = HubConfig {
        write_timeout_ms: 100,
        ..HubConfig::default()
    };
    let (hub, mut presence) = spawn_test_hub(config);
    let alice = UserId::from("alice");

    // Nobody reads this pipe, so the first batch cannot finish in time.
    let (_client, server) = duplex(32);
    let session = hub.connect(SessionId::new("alice", "t1"), server).await.unwrap();

    assert_eq!(hub.broadcast_to_user(&alice, &stats_event("alice")), 1);

    timeout(WAIT, session.finished()).await.expect("pumps stop");
    eventually(|| hub.session_count() == 0).await;
    assert!(!hub.is_online(&alice).await.unwrap());
    assert_eq!(drain(&mut presence), vec![online("alice"), offline("alice")]);
}

// ============================================================================
// Inbound Frame Tests
// ============================================================================

#[tokio::test]
async fn test_ping_is_answered() {
    let (hub, _presence) = spawn_test_hub(HubConfig::default());
    let (_session, mut client) = connect(&hub, "alice", "t1").await;

    send_line(&mut client, r#"{"type":"ping"}"#).await;
    assert_eq!(read_line(&mut client).await.as_deref(), Some(r#"{"type":"pong"}"#));
}

#[tokio::test]
async fn test_unknown_frames_are_published() {
    let (hub, _presence) = spawn_test_hub(HubConfig::default());
    let mut events = hub.subscribe();
    let (_session, mut client) = connect(&hub, "alice", "t1").await;

    send_line(&mut client, "this is not json").await;
    send_line(
        &mut client,
        r#"{"type":"private_message","payload":{"receiverId":"bob","content":"hi"}}"#,
    )
    .await;

    let (session_id, kind, payload) = timeout(WAIT, async {
        loop {
            if let HubEvent::ClientMessage {
                session_id,
                kind,
                payload,
            } = events.recv().await.unwrap()
            {
                return (session_id, kind, payload);
            }
        }
    })
    .await
    .expect("client message event");

    assert_eq!(session_id, SessionId::new("alice", "t1"));
    assert_eq!(kind, "private_message");
    assert_eq!(payload["content"], "hi");
    assert_eq!(hub.session_count(), 1);
}

// ============================================================================
// Config Edge Tests
// ============================================================================

#[tokio::test]
async fn test_zero_intervals_do_not_kill_hub() {
    let config = HubConfig {
        heartbeat_interval_ms: 0,
        ping_interval_ms: 0,
        ..HubConfig::default()
    };
    let (hub, mut presence) = spawn_test_hub(config);
    let alice = UserId::from("alice");

    let (session, mut client) = connect(&hub, "alice", "t1").await;
    assert_eq!(hub.session_count(), 1);

    // The write pump pings immediately and keeps running.
    assert_eq!(read_line(&mut client).await.as_deref(), Some(r#"{"type":"ping"}"#));
    assert!(!session.is_closed());
    assert_eq!(hub.sweep_heartbeats().await.unwrap(), 0);

    drop(client);
    timeout(WAIT, session.finished()).await.expect("pumps stop");
    eventually(|| hub.session_count() == 0).await;
    assert!(!hub.is_online(&alice).await.unwrap());
    assert_eq!(drain(&mut presence), vec![online("alice"), offline("alice")]);
    assert!(hub.is_connected());
}

// ============================================================================
// Admin Tests
// ============================================================================

#[tokio::test]
async fn test_close_session_and_close_user() {
    let (hub, mut presence) = spawn_test_hub(HubConfig::default());

    let (_a, _alice_client) = connect(&hub, "alice", "t1").await;
    let (_b, _bob_client) = connect(&hub, "bob", "t1").await;
    drain(&mut presence);

    assert!(hub.close_session(&SessionId::new("alice", "t1")).await.unwrap());
    assert!(!hub.close_session(&SessionId::new("alice", "t1")).await.unwrap());
    assert_eq!(hub.close_user_sessions(&UserId::from("bob")).await.unwrap(), 1);
    assert_eq!(hub.close_user_sessions(&UserId::from("bob")).await.unwrap(), 0);

    assert_eq!(hub.session_count(), 0);
    assert_eq!(drain(&mut presence), vec![offline("alice"), offline("bob")]);
}

#[tokio::test]
async fn test_sessions_snapshot() {
    let (hub, _presence) = spawn_test_hub(HubConfig::default());
    let (a, _ac) = connect(&hub, "alice", "t1").await;
    let (b, _bc) = connect(&hub, "bob", "t9").await;

    let views = hub.sessions();
    assert_eq!(views.len(), 2);
    assert_eq!(views[0].connection_id, a.connection_id());
    assert_eq!(views[1].id, SessionId::new("bob", "t9"));
    assert_eq!(views[1].connection_id, b.connection_id());
    assert!(views.iter().all(|v| v.is_active));
}

#[tokio::test]
async fn test_shutdown_closes_everything() {
    let (hub, mut presence) = spawn_test_hub(HubConfig::default());

    let (a, _ac) = connect(&hub, "alice", "t1").await;
    let (b, _bc) = connect(&hub, "bob", "t1").await;
    drain(&mut presence);

    hub.shutdown().await.unwrap();

    assert_eq!(hub.session_count(), 0);
    assert!(a.is_closed() && b.is_closed());
    let mut updates = drain(&mut presence);
    updates.sort_by(|x, y| x.user_id().cmp(y.user_id()));
    assert_eq!(updates, vec![offline("alice"), offline("bob")]);

    eventually(|| !hub.is_connected()).await;
    assert_eq!(
        hub.is_online(&UserId::from("alice")).await,
        Err(RegistryError::ChannelClosed)
    );
}

#[tokio::test]
async fn test_presence_failure_does_not_affect_connections() {
    let hub = spawn_hub(HubConfig::default(), Arc::new(FailingPresence));
    let alice = UserId::from("alice");

    let (_session, mut client) = connect(&hub, "alice", "t1").await;
    assert!(hub.has_active_session(&alice));
    assert!(hub.is_online(&alice).await.unwrap());

    assert_eq!(hub.broadcast_to_user(&alice, &stats_event("alice")), 1);
    assert!(read_line(&mut client).await.is_some());
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_churn_keeps_maps_consistent() {
    let (hub, _presence) = spawn_test_hub(HubConfig::default());

    let mut tasks = Vec::new();
    for i in 0..20 {
        let hub = hub.clone();
        tasks.push(tokio::spawn(async move {
            let user = format!("user-{}", i % 5);
            let (client, server) = duplex(4096);
            hub.connect(SessionId::new(user.as_str(), format!("tab-{i}").as_str()), server)
                .await
                .unwrap();
            if i % 2 == 0 {
                drop(client);
                None
            } else {
                Some(client)
            }
        }));
    }

    let mut kept = Vec::new();
    for task in tasks {
        if let Some(client) = task.await.unwrap() {
            kept.push(client);
        }
    }

    // Five users, evict_all: at most one session each survives.
    eventually(|| hub.session_count() <= 5 && hub.check_consistency()).await;
    for i in 0..5 {
        assert!(hub.active_session_count(&UserId::from(format!("user-{i}"))) <= 1);
    }
}
