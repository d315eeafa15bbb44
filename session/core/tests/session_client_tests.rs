//! Session client integration tests
//!
//! Drive the façade end to end over scripted in-process transports:
//! - Transport failover and connect failures
//! - Send validation, echo and failure reporting
//! - Stream assembly and protocol conflicts
//! - Reconnection backoff, exhaustion and disconnect
//! - Network offline/online handling
//!
//! Time-dependent tests run on tokio's paused clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use tokio::time::Instant;
use tokio_stream::StreamExt;

use chat_session_core::transport::{InProcessFactory, OpenBehavior};
use chat_session_core::{
    AdapterFactory, ApiError, AssembledMessage, ClientConfig, ClientEvent, ClientEvents,
    ConnectionState, HeartbeatConfig, InboundFrame, MessageId, MessageKind, MessageStatus,
    NetworkSignal, NetworkStatus, OutboundFrame, ReconnectPhase, Session, SessionApi,
    SessionClient, SessionError, SessionId, TransportKind,
};

// =============================================================================
// Fixtures
// =============================================================================

struct FakeApi {
    session_id: &'static str,
    history: Vec<AssembledMessage>,
    fail_create: bool,
    creates: AtomicUsize,
}

impl FakeApi {
    fn new(session_id: &'static str) -> Self {
        Self {
            session_id,
            history: Vec::new(),
            fail_create: false,
            creates: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SessionApi for FakeApi {
    async fn create(&self) -> Result<Session, ApiError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create {
            return Err(ApiError::Status {
                status: 503,
                body: "maintenance".to_string(),
            });
        }
        Ok(Session {
            id: SessionId::from(self.session_id),
            created_at: Utc::now(),
        })
    }

    async fn fetch_history(
        &self,
        _session_id: &SessionId,
    ) -> Result<Vec<AssembledMessage>, ApiError> {
        Ok(self.history.clone())
    }
}

struct Harness {
    client: SessionClient,
    events: ClientEvents,
    factory: Arc<InProcessFactory>,
    network: NetworkSignal,
    api: Arc<FakeApi>,
}

fn harness_with(api: FakeApi, factory: InProcessFactory) -> Harness {
    harness_with_heartbeat(api, factory, HeartbeatConfig::disabled())
}

fn harness_with_heartbeat(
    api: FakeApi,
    factory: InProcessFactory,
    heartbeat: HeartbeatConfig,
) -> Harness {
    let factory = Arc::new(factory);
    let api = Arc::new(api);
    let network = NetworkSignal::new(NetworkStatus::Online);

    let mut config = ClientConfig::default();
    config.heartbeat = heartbeat;

    let (client, events) = SessionClient::builder(config)
        .adapter_factory(Arc::clone(&factory) as Arc<dyn AdapterFactory>)
        .session_api(Arc::clone(&api) as Arc<dyn SessionApi>)
        .network_signal(network.clone())
        .build()
        .unwrap();

    Harness {
        client,
        events,
        factory,
        network,
        api,
    }
}

fn harness() -> Harness {
    harness_with(FakeApi::new("abc123"), InProcessFactory::new())
}

/// Next event, failing the test if none arrives
async fn next_event(events: &mut ClientEvents) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(300), events.next())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream ended")
}

/// Events up to and including the first one matching `done`
async fn collect_until(
    events: &mut ClientEvents,
    done: impl Fn(&ClientEvent) -> bool,
) -> Vec<ClientEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let finished = done(&event);
        seen.push(event);
        if finished {
            return seen;
        }
    }
}

/// Everything already queued, waiting briefly for stragglers
async fn drain(events: &mut ClientEvents) -> Vec<ClientEvent> {
    let mut seen = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(50), events.next()).await
    {
        seen.push(event);
    }
    seen
}

fn chunk(id: &str, content: &str) -> InboundFrame {
    InboundFrame::StreamChunk {
        message_id: Some(MessageId::from(id)),
        content: content.to_string(),
        is_final: false,
    }
}

fn complete(id: &str) -> InboundFrame {
    InboundFrame::StreamComplete {
        message_id: Some(MessageId::from(id)),
    }
}

// =============================================================================
// Connect and Failover
// =============================================================================

/// Session "abc123": the socket hangs past the open timeout, the event stream
/// opens within two seconds, and the host sees a stream connection after
/// roughly ten seconds without any error.
#[tokio::test(start_paused = true)]
async fn test_socket_timeout_fails_over_to_stream() {
    let factory = InProcessFactory::new();
    factory.set_default(TransportKind::Socket, OpenBehavior::Hang);
    factory.set_default(
        TransportKind::Stream,
        OpenBehavior::Accept {
            after: Duration::from_millis(1500),
        },
    );
    let mut h = harness_with(FakeApi::new("abc123"), factory);

    let start = Instant::now();
    let transport = h.client.connect().await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(transport, TransportKind::Stream);
    assert!(elapsed >= Duration::from_secs(10), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(12), "elapsed {elapsed:?}");
    assert_eq!(h.client.state(), ConnectionState::Connected(TransportKind::Stream));
    assert_eq!(h.client.session_id(), Some(SessionId::from("abc123")));

    let peers = h.factory.peers();
    assert_eq!(peers.len(), 2);
    assert_eq!(peers[0].close_calls(), 1);
    assert_eq!(peers[1].session_id(), Some(SessionId::from("abc123")));

    let events = drain(&mut h.events).await;
    assert!(events.contains(&ClientEvent::Connected {
        transport: TransportKind::Stream,
        reconnected: false,
    }));
    assert!(!events.iter().any(|e| matches!(
        e,
        ClientEvent::ServerError { .. } | ClientEvent::ReconnectExhausted { .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn test_history_precedes_connected() {
    let mut api = FakeApi::new("abc123");
    api.history = vec![AssembledMessage {
        id: MessageId::from("h1"),
        kind: MessageKind::Assistant,
        content: "Welcome back".to_string(),
        status: MessageStatus::Received,
        timestamp: Utc::now(),
    }];
    let mut h = harness_with(api, InProcessFactory::new());

    h.client.connect().await.unwrap();
    let events = collect_until(&mut h.events, |e| {
        matches!(e, ClientEvent::Connected { .. })
    })
    .await;

    let history_at = events
        .iter()
        .position(|e| matches!(e, ClientEvent::History { .. }))
        .expect("history event");
    assert_eq!(events[0], ClientEvent::StateChanged(ConnectionState::Connecting));
    assert_eq!(history_at, 1);
    match &events[history_at] {
        ClientEvent::History { messages } => assert_eq!(messages[0].content, "Welcome back"),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_both_transports_fail() {
    let factory = InProcessFactory::new();
    factory.set_default(TransportKind::Socket, OpenBehavior::refuse("upgrade refused"));
    factory.set_default(TransportKind::Stream, OpenBehavior::refuse("404"));
    let mut h = harness_with(FakeApi::new("abc123"), factory);

    let err = h.client.connect().await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, SessionError::TransportUnavailable { .. }));
    assert_eq!(h.client.state(), ConnectionState::Disconnected);

    // A failed initial connect is not retried behind the host's back.
    let events = drain(&mut h.events).await;
    assert!(!events
        .iter()
        .any(|e| matches!(e, ClientEvent::ReconnectScheduled { .. })));
    assert_eq!(h.factory.created_kinds().len(), 2);

    // The session survives; a manual retry reuses it.
    h.factory
        .set_default(TransportKind::Socket, OpenBehavior::accept());
    assert_eq!(h.client.connect().await.unwrap(), TransportKind::Socket);
    assert_eq!(h.api.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_session_creation_failure_is_fatal_to_connect() {
    let mut api = FakeApi::new("abc123");
    api.fail_create = true;
    let h = harness_with(api, InProcessFactory::new());

    let err = h.client.connect().await.unwrap_err();
    assert!(matches!(err, SessionError::ConnectionFailed(_)));
    assert!(h.factory.created_kinds().is_empty());
    assert_eq!(h.client.session_id(), None);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_connecting_discards_attempt() {
    let factory = InProcessFactory::new();
    factory.set_default(
        TransportKind::Socket,
        OpenBehavior::Accept {
            after: Duration::from_secs(3),
        },
    );
    let h = harness_with(FakeApi::new("abc123"), factory);

    let (connect, ()) = tokio::join!(h.client.connect(), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.client.disconnect().await;
    });
    assert!(matches!(connect, Err(SessionError::ConnectionFailed(_))));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.client.state(), ConnectionState::Disconnected);
    assert!(h.factory.open_peer().is_none());
}

// =============================================================================
// Sending
// =============================================================================

#[tokio::test]
async fn test_blank_sends_touch_nothing() {
    let mut h = harness();
    h.client.connect().await.unwrap();
    drain(&mut h.events).await;

    assert!(matches!(
        h.client.send("").await,
        Err(SessionError::EmptyMessage)
    ));
    assert!(matches!(
        h.client.send("   ").await,
        Err(SessionError::EmptyMessage)
    ));

    assert_eq!(h.factory.total_send_calls(), 0);
    let events = drain(&mut h.events).await;
    assert!(events.is_empty(), "unexpected events {events:?}");
}

#[tokio::test]
async fn test_send_delivers_frame_after_echo() {
    let mut h = harness();
    h.client.connect().await.unwrap();

    let id = h.client.send("Hello there").await.unwrap();
    let events = collect_until(&mut h.events, |e| matches!(e, ClientEvent::Sent { .. })).await;

    let echo = events
        .iter()
        .find_map(|e| match e {
            ClientEvent::LocalEcho { message } => Some(message.clone()),
            _ => None,
        })
        .expect("local echo");
    assert_eq!(echo.id, id);
    assert_eq!(echo.content, "Hello there");
    assert_eq!(echo.status, MessageStatus::Sending);

    let sent = h.factory.open_peer().unwrap().sent();
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        OutboundFrame::Message(message) => {
            assert_eq!(message.id(), &id);
            assert_eq!(message.content(), "Hello there");
            assert_eq!(message.kind(), MessageKind::User);
        }
        other => panic!("unexpected frame {other:?}"),
    }
}

#[tokio::test]
async fn test_send_failure_carries_content() {
    let mut h = harness();
    h.client.connect().await.unwrap();
    h.factory.open_peer().unwrap().fail_sends(true);

    let id = h.client.send("retry me").await.unwrap();
    let events =
        collect_until(&mut h.events, |e| matches!(e, ClientEvent::SendFailed { .. })).await;

    match events.last() {
        Some(ClientEvent::SendFailed {
            message_id,
            content,
            ..
        }) => {
            assert_eq!(message_id, &id);
            assert_eq!(content, "retry me");
        }
        other => panic!("unexpected event {other:?}"),
    }
    // One failed send does not tear the session down.
    assert!(h.client.state().is_connected());
}

// =============================================================================
// Inbound Assembly
// =============================================================================

#[tokio::test]
async fn test_streamed_reply_assembles_in_order() {
    let mut h = harness();
    h.client.connect().await.unwrap();
    let peer = h.factory.open_peer().unwrap();

    for part in ["The ", "quick ", "brown ", "fox"] {
        assert!(peer.push(chunk("a1", part)));
    }
    peer.push(complete("a1"));

    let events = collect_until(&mut h.events, |e| matches!(e, ClientEvent::Message { .. })).await;
    let partials: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::Partial { message } => Some(message.content.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        partials,
        vec!["The ", "The quick ", "The quick brown ", "The quick brown fox"]
    );
    match events.last() {
        Some(ClientEvent::Message { message }) => {
            assert_eq!(message.id, MessageId::from("a1"));
            assert_eq!(message.content, "The quick brown fox");
            assert_eq!(message.status, MessageStatus::Received);
            assert_eq!(message.kind, MessageKind::Assistant);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_conflicting_chunk_leaves_stream_intact() {
    let mut h = harness();
    h.client.connect().await.unwrap();
    let peer = h.factory.open_peer().unwrap();

    peer.push(chunk("m1", "Hel"));
    peer.push(chunk("m2", "intruder"));
    peer.push(chunk("m1", "lo"));
    peer.push(complete("m1"));

    let events = collect_until(&mut h.events, |e| matches!(e, ClientEvent::Message { .. })).await;
    let conflict = events
        .iter()
        .find_map(|e| match e {
            ClientEvent::ProtocolConflict { message_id, .. } => Some(message_id.clone()),
            _ => None,
        })
        .expect("protocol conflict");
    assert_eq!(conflict, Some(MessageId::from("m2")));

    match events.last() {
        Some(ClientEvent::Message { message }) => {
            assert_eq!(message.content, "Hello");
            assert_eq!(message.status, MessageStatus::Received);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_stray_completion_and_malformed_frames_are_dropped() {
    let mut h = harness();
    h.client.connect().await.unwrap();
    drain(&mut h.events).await;
    let peer = h.factory.open_peer().unwrap();

    peer.push(complete("ghost"));
    peer.push_text("{not json");
    peer.push_text(r#"{"type":"mystery"}"#);
    peer.push_text(r#"{"type":"message","data":{"id":"s1","content":"hi","message_type":"assistant"}}"#);

    let events = collect_until(&mut h.events, |e| matches!(e, ClientEvent::Message { .. })).await;
    assert_eq!(events.len(), 1, "unexpected events {events:?}");
    assert!(h.client.state().is_connected());
}

#[tokio::test]
async fn test_server_copy_of_own_message_is_skipped() {
    let mut h = harness();
    h.client.connect().await.unwrap();
    drain(&mut h.events).await;
    let peer = h.factory.open_peer().unwrap();

    peer.push_text(r#"{"type":"message","data":{"id":"u1","content":"mine","message_type":"user"}}"#);
    peer.push_text(r#"{"type":"message","data":{"id":"a1","content":"theirs","message_type":"assistant"}}"#);

    let events = collect_until(&mut h.events, |e| matches!(e, ClientEvent::Message { .. })).await;
    match events.as_slice() {
        [ClientEvent::Message { message }] => assert_eq!(message.content, "theirs"),
        other => panic!("unexpected events {other:?}"),
    }
}

#[tokio::test]
async fn test_heartbeat_echo_updates_latency() {
    let mut h = harness();
    h.client.connect().await.unwrap();
    let peer = h.factory.open_peer().unwrap();

    let echo = Utc::now().timestamp_millis() - 40;
    peer.push(InboundFrame::Heartbeat { echo: Some(echo) });
    peer.push(InboundFrame::Heartbeat { echo: None });

    let events = collect_until(&mut h.events, |e| matches!(e, ClientEvent::Latency { .. })).await;
    match events.last() {
        Some(ClientEvent::Latency { millis }) => assert!(*millis >= 40),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(h.client.latency_millis().is_some_and(|ms| ms >= 40));
}

#[tokio::test(start_paused = true)]
async fn test_idle_socket_sends_nothing_by_default() {
    let h = harness_with_heartbeat(
        FakeApi::new("abc123"),
        InProcessFactory::new(),
        HeartbeatConfig::default(),
    );
    assert_eq!(h.client.connect().await.unwrap(), TransportKind::Socket);
    let peer = h.factory.open_peer().unwrap();

    tokio::time::sleep(Duration::from_secs(300)).await;

    assert!(peer.sent().is_empty());
    assert_eq!(h.factory.total_send_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_enabled_heartbeat_pings_on_interval() {
    let h = harness_with_heartbeat(
        FakeApi::new("abc123"),
        InProcessFactory::new(),
        HeartbeatConfig::every(Duration::from_secs(30)),
    );
    h.client.connect().await.unwrap();
    let peer = h.factory.open_peer().unwrap();

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(peer.sent().is_empty());

    tokio::time::sleep(Duration::from_secs(32)).await;
    let pings = peer
        .sent()
        .into_iter()
        .filter(|frame| matches!(frame, OutboundFrame::Ping { .. }))
        .count();
    assert_eq!(pings, 2);
}

// =============================================================================
// Reconnection
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_dropped_socket_reconnects_after_backoff() {
    let mut h = harness();
    h.client.connect().await.unwrap();
    let peer = h.factory.open_peer().unwrap();
    drain(&mut h.events).await;

    peer.push(chunk("a1", "half a"));
    let start = Instant::now();
    peer.close(Some(1006), "abnormal closure");

    let events = collect_until(&mut h.events, |e| matches!(e, ClientEvent::Connected { .. })).await;
    let elapsed = start.elapsed();

    assert!(events.contains(&ClientEvent::ReconnectScheduled {
        attempt: 1,
        delay: Duration::from_secs(1),
    }));
    assert!(events.iter().any(|e| matches!(
        e,
        ClientEvent::Message { message } if message.status == MessageStatus::Error
            && message.content == "half a"
    )));
    assert_eq!(
        events.last(),
        Some(&ClientEvent::Connected {
            transport: TransportKind::Socket,
            reconnected: true,
        })
    );
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(2));

    let state = h.client.reconnect_state().await.unwrap();
    assert_eq!(state.attempt, 0);
    assert_eq!(state.phase, ReconnectPhase::Idle);
    assert_eq!(h.api.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_normal_server_close_still_reconnects() {
    let mut h = harness();
    h.client.connect().await.unwrap();
    let peer = h.factory.open_peer().unwrap();
    drain(&mut h.events).await;

    peer.close(Some(1000), "server restart");

    let events = collect_until(&mut h.events, |e| matches!(e, ClientEvent::Connected { .. })).await;
    assert!(events.contains(&ClientEvent::ReconnectScheduled {
        attempt: 1,
        delay: Duration::from_secs(1),
    }));
    assert_eq!(
        events.last(),
        Some(&ClientEvent::Connected {
            transport: TransportKind::Socket,
            reconnected: true,
        })
    );
    assert_eq!(h.factory.created_kinds().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_exhaustion_notifies_once() {
    let mut h = harness();
    h.client.connect().await.unwrap();
    let peer = h.factory.open_peer().unwrap();
    drain(&mut h.events).await;

    h.factory
        .set_default(TransportKind::Socket, OpenBehavior::refuse("server down"));
    h.factory
        .set_default(TransportKind::Stream, OpenBehavior::refuse("server down"));
    peer.close(Some(1006), "abnormal closure");

    let mut events = collect_until(&mut h.events, |e| {
        matches!(e, ClientEvent::ReconnectExhausted { .. })
    })
    .await;
    events.extend(drain(&mut h.events).await);

    let delays: Vec<(u32, Duration)> = events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::ReconnectScheduled { attempt, delay } => Some((*attempt, *delay)),
            _ => None,
        })
        .collect();
    assert_eq!(
        delays,
        vec![
            (1, Duration::from_millis(1000)),
            (2, Duration::from_millis(2000)),
            (3, Duration::from_millis(4000)),
            (4, Duration::from_millis(8000)),
            (5, Duration::from_millis(16000)),
        ]
    );
    let exhausted: Vec<&ClientEvent> = events
        .iter()
        .filter(|e| matches!(e, ClientEvent::ReconnectExhausted { .. }))
        .collect();
    assert_eq!(exhausted, vec![&ClientEvent::ReconnectExhausted { attempts: 5 }]);
    assert_eq!(h.client.state(), ConnectionState::Failed);

    // Exhaustion is terminal until the host tears the client down.
    assert!(matches!(
        h.client.connect().await,
        Err(SessionError::ReconnectExhausted { attempts: 5 })
    ));
    h.client.disconnect().await;
    h.factory
        .set_default(TransportKind::Socket, OpenBehavior::accept());
    assert_eq!(h.client.connect().await.unwrap(), TransportKind::Socket);
}

#[tokio::test]
async fn test_double_disconnect_is_harmless() {
    let h = harness();
    h.client.connect().await.unwrap();
    let peer = h.factory.open_peer().unwrap();

    h.client.disconnect().await;
    h.client.disconnect().await;

    assert_eq!(h.client.state(), ConnectionState::Disconnected);
    assert!(!peer.is_open());
    assert_eq!(peer.close_calls(), 1);

    let state = h.client.reconnect_state().await.unwrap();
    assert_eq!(state.attempt, 0);
    assert_eq!(state.phase, ReconnectPhase::Idle);
    assert!(matches!(
        h.client.send("anyone?").await,
        Err(SessionError::NotConnected)
    ));
}

// =============================================================================
// Network Signal
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_offline_then_online_reconnects_immediately() {
    let mut h = harness();
    h.client.connect().await.unwrap();
    let peer = h.factory.open_peer().unwrap();
    drain(&mut h.events).await;

    h.network.set_offline();
    let events = collect_until(&mut h.events, |e| {
        *e == ClientEvent::StateChanged(ConnectionState::Offline)
    })
    .await;
    assert!(!events
        .iter()
        .any(|e| matches!(e, ClientEvent::ReconnectScheduled { .. })));
    assert!(!peer.is_open());

    let state = h.client.reconnect_state().await.unwrap();
    assert_eq!(state.attempt, 0);
    assert!(matches!(
        h.client.send("while offline").await,
        Err(SessionError::NotConnected)
    ));

    let start = Instant::now();
    h.network.set_online();
    let events = collect_until(&mut h.events, |e| matches!(e, ClientEvent::Connected { .. })).await;
    assert!(start.elapsed() < Duration::from_millis(100));
    assert_eq!(
        events.last(),
        Some(&ClientEvent::Connected {
            transport: TransportKind::Socket,
            reconnected: true,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_while_offline_waits_for_network() {
    let mut h = harness();
    h.network.set_offline();

    let (connect, ()) = tokio::join!(h.client.connect(), async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.factory.created_kinds().len(), 0);
        h.network.set_online();
    });
    assert_eq!(connect.unwrap(), TransportKind::Socket);

    let events = drain(&mut h.events).await;
    assert_eq!(events.first(), Some(&ClientEvent::StateChanged(ConnectionState::Offline)));
}
