//! Session Client - The Host-Facing Façade
//!
//! Owns the session identity and orchestrates the transport selector, the
//! message assembler and the reconnection scheduler on behalf of the host
//! application.
//!
//! # Architecture
//!
//! ```text
//!  SessionClient ──commands──► driver task ──ClientEvent──► ClientEvents (host)
//!        ▲                       │    ▲
//!        │ watch (state,         │    │ AdapterEvent (inbound frames, close)
//!        │ latency, session)     ▼    │
//!        └──────────────── Connection (socket | stream)
//! ```
//!
//! Everything stateful lives in one driver task that handles a single wake-up
//! at a time: a host command, an inbound adapter event, a finished connection
//! attempt, a due reconnection, a heartbeat tick or a network change. No
//! locks guard the connection or the in-progress message; ordering follows
//! from the driver being the only owner.
//!
//! Connection attempts (session creation, history prefetch, transport
//! selection) run on their own task and report back tagged with an epoch.
//! `disconnect` and going offline bump the epoch, so a late attempt is
//! closed on arrival instead of resurrecting a connection.
//!
//! The host must keep draining [`ClientEvents`]; the driver waits when the
//! event channel is full.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;

use crate::assembler::MessageAssembler;
use crate::config::ClientConfig;
use crate::error::SessionError;
use crate::latency::HeartbeatConfig;
use crate::messages::{
    AssembledMessage, ClientEvent, ConnectionState, MessageId, MessageKind, OutboundMessage,
    SessionId,
};
use crate::network::{NetworkSignal, NetworkStatus, NetworkSubscription};
use crate::reconnect::{ReconnectDecision, ReconnectScheduler, ReconnectState};
use crate::session::{HttpSessionApi, Session, SessionApi};
use crate::transport::{
    build_http_client, AdapterEvent, AdapterFactory, Connection, DefaultAdapterFactory,
    InboundFrame, OutboundFrame, TransportKind, TransportSelector,
};

/// Stream of events delivered to the host
pub type ClientEvents = ReceiverStream<ClientEvent>;

/// Capacity of the command channel between the façade and the driver
const COMMAND_BUFFER: usize = 32;

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`SessionClient`]
///
/// Every collaborator defaults to the real implementation: socket and
/// event-stream adapters, the HTTP session API and the process-wide network
/// signal.
pub struct SessionClientBuilder {
    config: ClientConfig,
    adapter_factory: Option<Arc<dyn AdapterFactory>>,
    session_api: Option<Arc<dyn SessionApi>>,
    network: Option<NetworkSignal>,
}

impl SessionClientBuilder {
    /// Use a custom adapter source
    #[must_use]
    pub fn adapter_factory(mut self, factory: Arc<dyn AdapterFactory>) -> Self {
        self.adapter_factory = Some(factory);
        self
    }

    /// Use a custom session API
    #[must_use]
    pub fn session_api(mut self, api: Arc<dyn SessionApi>) -> Self {
        self.session_api = Some(api);
        self
    }

    /// Observe this network signal instead of the global one
    #[must_use]
    pub fn network_signal(mut self, signal: NetworkSignal) -> Self {
        self.network = Some(signal);
        self
    }

    /// Spawn the driver and return the client with its event stream
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails only when the HTTP client for the default collaborators cannot
    /// be built.
    pub fn build(self) -> Result<(SessionClient, ClientEvents), SessionError> {
        let Self {
            config,
            adapter_factory,
            session_api,
            network,
        } = self;

        let mut http_client = None;
        let factory: Arc<dyn AdapterFactory> = match adapter_factory {
            Some(factory) => factory,
            None => Arc::new(DefaultAdapterFactory::with_client(
                config.transport.clone(),
                shared_http_client(&config, &mut http_client)?,
            )),
        };
        let api: Arc<dyn SessionApi> = match session_api {
            Some(api) => api,
            None => Arc::new(
                HttpSessionApi::new(
                    config.transport.clone(),
                    shared_http_client(&config, &mut http_client)?,
                )
                .with_paging(
                    config.limits.history_page_size,
                    config.limits.history_max_pages,
                ),
            ),
        };
        let network = network.unwrap_or_else(|| NetworkSignal::global().clone());

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(config.limits.event_capacity.max(1));
        let (attempt_tx, attempt_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (latency_tx, latency_rx) = watch::channel(None);
        let (session_tx, session_rx) = watch::channel(None);

        tracing::debug!(
            base_url = %config.transport.base_url,
            network = ?network.status(),
            "Session client created"
        );

        let driver = Driver {
            selector: TransportSelector::new(config.transport.clone(), factory),
            scheduler: ReconnectScheduler::new(config.reconnect.clone()),
            assembler: MessageAssembler::new(config.heartbeat.latency_window),
            subscription: Some(network.subscribe()),
            max_attempts: config.reconnect.max_attempts,
            heartbeat: config.heartbeat.clone(),
            api,
            network,
            commands: command_rx,
            attempt_tx,
            attempt_rx,
            events: event_tx,
            state_tx,
            latency_tx,
            session_tx,
            session: None,
            connection: None,
            reconnect_at: None,
            ping: None,
            in_flight: None,
            epoch: 0,
            pending_connects: Vec::new(),
            wanted: false,
            established_once: false,
        };
        tokio::spawn(driver.run());

        let client = SessionClient {
            commands: command_tx,
            state: state_rx,
            latency: latency_rx,
            session: session_rx,
            max_message_chars: config.limits.max_message_chars,
        };
        Ok((client, ReceiverStream::new(event_rx)))
    }
}

/// The HTTP client shared by the default collaborators, built on first use
fn shared_http_client(
    config: &ClientConfig,
    cache: &mut Option<reqwest::Client>,
) -> Result<reqwest::Client, SessionError> {
    if let Some(client) = cache {
        return Ok(client.clone());
    }
    let client = build_http_client(&config.transport)
        .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;
    *cache = Some(client.clone());
    Ok(client)
}

// ============================================================================
// Façade
// ============================================================================

/// Requests from the façade to the driver
enum Command {
    Connect {
        reply: oneshot::Sender<Result<TransportKind, SessionError>>,
    },
    Send {
        message: OutboundMessage,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    ReconnectState {
        reply: oneshot::Sender<ReconnectState>,
    },
}

/// Real-time chat session client
///
/// Dropping the client stops its driver and closes any open connection.
pub struct SessionClient {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    latency: watch::Receiver<Option<u64>>,
    session: watch::Receiver<Option<SessionId>>,
    max_message_chars: usize,
}

impl SessionClient {
    /// Start building a client
    #[must_use]
    pub fn builder(config: ClientConfig) -> SessionClientBuilder {
        SessionClientBuilder {
            config,
            adapter_factory: None,
            session_api: None,
            network: None,
        }
    }

    /// Connect, creating the session on first use
    ///
    /// Idempotent: while a connection is open this returns its transport
    /// at once, and while one is being established every caller waits for
    /// the same outcome.
    ///
    /// # Errors
    ///
    /// [`SessionError::ConnectionFailed`] when the session cannot be
    /// created, [`SessionError::TransportUnavailable`] when no transport
    /// opens, [`SessionError::ReconnectExhausted`] after reconnection gave
    /// up (call [`disconnect`](Self::disconnect) first to start over).
    pub async fn connect(&self) -> Result<TransportKind, SessionError> {
        self.request(|reply| Command::Connect { reply }).await?
    }

    /// Send a user message
    ///
    /// Emits a local echo, then `Sent` or `SendFailed` once the transport
    /// reports the outcome. Returns the local id used by those events.
    ///
    /// # Errors
    ///
    /// Empty, whitespace-only and over-long content is rejected before
    /// anything else happens. [`SessionError::NotConnected`] when no
    /// connection is open.
    pub async fn send(&self, content: impl Into<String>) -> Result<MessageId, SessionError> {
        self.send_as(content, MessageKind::User).await
    }

    /// Send a message of a specific kind
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn send_as(
        &self,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> Result<MessageId, SessionError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let length = content.chars().count();
        if length > self.max_message_chars {
            return Err(SessionError::MessageTooLong {
                length,
                max: self.max_message_chars,
            });
        }

        let message = OutboundMessage::new(content, kind);
        let id = message.id().clone();
        self.request(|reply| Command::Send { message, reply })
            .await??;
        Ok(id)
    }

    /// Close the connection and forget all reconnection state
    ///
    /// Safe to call any number of times.
    pub async fn disconnect(&self) {
        if self
            .request(|reply| Command::Disconnect { reply })
            .await
            .is_err()
        {
            tracing::debug!("Disconnect after driver shutdown");
        }
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe connection state changes
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Rolling latency estimate in milliseconds, once a sample exists
    #[must_use]
    pub fn latency_millis(&self) -> Option<u64> {
        *self.latency.borrow()
    }

    /// Observe latency changes
    #[must_use]
    pub fn watch_latency(&self) -> watch::Receiver<Option<u64>> {
        self.latency.clone()
    }

    /// Session id, once the server has issued one
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.session.borrow().clone()
    }

    /// Snapshot of the reconnection counters
    ///
    /// # Errors
    ///
    /// [`SessionError::ClientShutdown`] if the driver has stopped.
    pub async fn reconnect_state(&self) -> Result<ReconnectState, SessionError> {
        self.request(|reply| Command::ReconnectState { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SessionError::ClientShutdown)?;
        response.await.map_err(|_| SessionError::ClientShutdown)
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Why a connection attempt was started
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AttemptKind {
    /// Host-requested connect
    Initial,
    /// Scheduled or network-triggered reconnection
    Reconnect { attempt: u32 },
}

/// A connection attempt running on its own task
struct InFlight {
    kind: AttemptKind,
    handle: JoinHandle<()>,
}

/// Result of one attempt, reported back to the driver
struct AttemptOutcome {
    epoch: u64,
    session: Option<Session>,
    history: Option<Vec<AssembledMessage>>,
    result: Result<Connection, SessionError>,
}

/// What woke the driver
enum Wake {
    Command(Option<Command>),
    Attempt(AttemptOutcome),
    Inbound(Option<AdapterEvent>),
    ReconnectDue,
    PingDue,
    Network(Option<NetworkStatus>),
}

struct Driver {
    selector: TransportSelector,
    api: Arc<dyn SessionApi>,
    scheduler: ReconnectScheduler,
    assembler: MessageAssembler,
    network: NetworkSignal,
    subscription: Option<NetworkSubscription>,
    heartbeat: HeartbeatConfig,
    max_attempts: u32,

    commands: mpsc::Receiver<Command>,
    attempt_tx: mpsc::UnboundedSender<AttemptOutcome>,
    attempt_rx: mpsc::UnboundedReceiver<AttemptOutcome>,
    events: mpsc::Sender<ClientEvent>,
    state_tx: watch::Sender<ConnectionState>,
    latency_tx: watch::Sender<Option<u64>>,
    session_tx: watch::Sender<Option<SessionId>>,

    session: Option<Session>,
    connection: Option<Connection>,
    reconnect_at: Option<Instant>,
    ping: Option<Interval>,
    in_flight: Option<InFlight>,
    /// Bumped whenever in-flight work must be disowned
    epoch: u64,
    pending_connects: Vec<oneshot::Sender<Result<TransportKind, SessionError>>>,
    /// The host asked to be connected and has not disconnected since
    wanted: bool,
    established_once: bool,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                Some(outcome) = self.attempt_rx.recv() => Wake::Attempt(outcome),
                event = next_connection_event(&mut self.connection), if self.connection.is_some() => {
                    Wake::Inbound(event)
                }
                () = sleep_until_deadline(self.reconnect_at), if self.reconnect_at.is_some() => {
                    Wake::ReconnectDue
                }
                () = next_tick(&mut self.ping), if self.ping.is_some() => Wake::PingDue,
                status = next_network_change(&mut self.subscription), if self.subscription.is_some() => {
                    Wake::Network(status)
                }
            };

            match wake {
                Wake::Command(Some(command)) => self.handle_command(command).await,
                Wake::Command(None) => break,
                Wake::Attempt(outcome) => self.on_attempt_finished(outcome).await,
                Wake::Inbound(event) => self.on_inbound(event).await,
                Wake::ReconnectDue => self.on_reconnect_due().await,
                Wake::PingDue => self.on_ping(),
                Wake::Network(Some(NetworkStatus::Offline)) => self.on_offline().await,
                Wake::Network(Some(NetworkStatus::Online)) => self.on_online().await,
                Wake::Network(None) => self.subscription = None,
            }
        }

        self.shutdown().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => self.on_connect(reply).await,
            Command::Send { message, reply } => {
                let result = self.on_send(message).await;
                let _ = reply.send(result);
            }
            Command::Disconnect { reply } => {
                self.on_disconnect().await;
                let _ = reply.send(());
            }
            Command::ReconnectState { reply } => {
                let _ = reply.send(self.scheduler.state());
            }
        }
    }

    // ------------------------------------------------------------------
    // Connect / disconnect
    // ------------------------------------------------------------------

    async fn on_connect(&mut self, reply: oneshot::Sender<Result<TransportKind, SessionError>>) {
        if let Some(connection) = &self.connection {
            let _ = reply.send(Ok(connection.transport_kind()));
            return;
        }
        if self.scheduler.is_exhausted() {
            let _ = reply.send(Err(SessionError::ReconnectExhausted {
                attempts: self.scheduler.attempts(),
            }));
            return;
        }

        if self.subscription.is_none() {
            self.subscription = Some(self.network.subscribe());
        }
        self.pending_connects.push(reply);
        if self.wanted {
            // Already connecting, reconnecting or waiting for the network.
            return;
        }
        self.wanted = true;

        if self.network.status() == NetworkStatus::Offline {
            tracing::info!("Network offline, connect deferred");
            self.set_state(ConnectionState::Offline).await;
            return;
        }
        self.start_attempt(AttemptKind::Initial).await;
    }

    async fn on_disconnect(&mut self) {
        self.epoch += 1;
        if let Some(flight) = self.in_flight.take() {
            flight.handle.abort();
        }
        self.reconnect_at = None;
        self.ping = None;
        self.scheduler.reset();
        self.subscription = None;
        self.wanted = false;
        self.established_once = false;

        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
            tracing::info!(transport = %connection.transport_kind(), "Disconnected");
        }
        if let Some(event) = self.assembler.abandon("disconnected") {
            self.emit(event).await;
        }
        self.assembler.reset();
        self.latency_tx.send_replace(None);

        self.resolve_connects(Err(SessionError::ConnectionFailed(
            "disconnected before a transport opened".to_string(),
        )));
        self.set_state(ConnectionState::Disconnected).await;
    }

    async fn start_attempt(&mut self, kind: AttemptKind) {
        self.epoch += 1;
        let epoch = self.epoch;

        let state = match kind {
            AttemptKind::Initial => ConnectionState::Connecting,
            AttemptKind::Reconnect { attempt } => ConnectionState::Reconnecting {
                attempt,
                max_attempts: self.max_attempts,
            },
        };
        self.set_state(state).await;

        let selector = self.selector.clone();
        let api = Arc::clone(&self.api);
        let session = self.session.clone();
        let report = self.attempt_tx.clone();
        let handle = tokio::spawn(async move {
            let outcome = run_attempt(epoch, selector, api, session).await;
            let _ = report.send(outcome);
        });
        self.in_flight = Some(InFlight { kind, handle });
    }

    async fn on_attempt_finished(&mut self, outcome: AttemptOutcome) {
        if let Some(session) = outcome.session {
            if self.session.is_none() {
                self.session_tx.send_replace(Some(session.id.clone()));
                self.session = Some(session);
            }
        }

        if outcome.epoch != self.epoch || self.in_flight.is_none() {
            tracing::debug!(epoch = outcome.epoch, "Discarding stale connection attempt");
            if let Ok(mut connection) = outcome.result {
                connection.close().await;
            }
            return;
        }
        let Some(flight) = self.in_flight.take() else {
            return;
        };

        if let Some(history) = outcome.history {
            if !history.is_empty() {
                self.emit(ClientEvent::History { messages: history }).await;
            }
        }

        match outcome.result {
            Ok(connection) => self.on_established(connection, flight.kind).await,
            Err(e) => self.on_attempt_failed(e, flight.kind).await,
        }
    }

    async fn on_established(&mut self, connection: Connection, kind: AttemptKind) {
        let transport = connection.transport_kind();
        let reconnected = matches!(kind, AttemptKind::Reconnect { .. });

        self.scheduler.on_connected();
        self.established_once = true;
        if self.heartbeat.enabled && transport == TransportKind::Socket {
            self.ping = Some(ping_interval(self.heartbeat.ping_interval()));
        }
        self.connection = Some(connection);

        tracing::info!(transport = %transport, reconnected, "Connected");
        self.set_state(ConnectionState::Connected(transport)).await;
        self.emit(ClientEvent::Connected {
            transport,
            reconnected,
        })
        .await;
        self.resolve_connects(Ok(transport));
    }

    async fn on_attempt_failed(&mut self, error: SessionError, kind: AttemptKind) {
        match kind {
            AttemptKind::Initial => {
                tracing::error!(error = %error, "Connect failed");
                self.wanted = false;
                self.set_state(ConnectionState::Disconnected).await;
                self.resolve_connects(Err(error));
            }
            AttemptKind::Reconnect { attempt } => {
                tracing::warn!(attempt, error = %error, "Reconnection attempt failed");
                let decision = self.scheduler.on_attempt_failed();
                self.apply_decision(decision).await;
            }
        }
    }

    fn resolve_connects(&mut self, result: Result<TransportKind, SessionError>) {
        for reply in self.pending_connects.drain(..) {
            let _ = reply.send(result.clone());
        }
    }

    // ------------------------------------------------------------------
    // Reconnection
    // ------------------------------------------------------------------

    async fn apply_decision(&mut self, decision: ReconnectDecision) {
        match decision {
            ReconnectDecision::Schedule { attempt, delay } => {
                self.reconnect_at = Some(Instant::now() + delay);
                self.set_state(ConnectionState::Reconnecting {
                    attempt,
                    max_attempts: self.max_attempts,
                })
                .await;
                self.emit(ClientEvent::ReconnectScheduled { attempt, delay })
                    .await;
            }
            ReconnectDecision::Exhausted { attempts } => {
                self.reconnect_at = None;
                self.wanted = false;
                self.set_state(ConnectionState::Failed).await;
                self.emit(ClientEvent::ReconnectExhausted { attempts }).await;
                self.resolve_connects(Err(SessionError::ReconnectExhausted { attempts }));
            }
            ReconnectDecision::Ignored => {}
        }
    }

    async fn on_reconnect_due(&mut self) {
        self.reconnect_at = None;
        if let Some(attempt) = self.scheduler.begin_attempt() {
            tracing::info!(attempt, "Reconnecting");
            self.start_attempt(AttemptKind::Reconnect { attempt }).await;
        }
    }

    async fn on_connection_lost(&mut self, reason: &str) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        connection.close().await;
        self.ping = None;
        tracing::warn!(transport = %connection.transport_kind(), reason, "Connection lost");

        if let Some(event) = self.assembler.abandon(reason) {
            self.emit(event).await;
        }

        if self.network.status() == NetworkStatus::Offline {
            self.set_state(ConnectionState::Offline).await;
            return;
        }
        let decision = self.scheduler.on_connection_lost();
        self.apply_decision(decision).await;
    }

    // ------------------------------------------------------------------
    // Network
    // ------------------------------------------------------------------

    async fn on_offline(&mut self) {
        if !self.wanted {
            return;
        }
        self.scheduler.suspend();
        self.reconnect_at = None;
        if let Some(flight) = self.in_flight.take() {
            flight.handle.abort();
            self.epoch += 1;
        }
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
            self.ping = None;
            if let Some(event) = self.assembler.abandon("network offline") {
                self.emit(event).await;
            }
        }
        tracing::info!("Network offline, connection suspended");
        self.set_state(ConnectionState::Offline).await;
    }

    async fn on_online(&mut self) {
        if !self.wanted || self.in_flight.is_some() || self.connection.is_some() {
            return;
        }
        if !self.established_once {
            self.start_attempt(AttemptKind::Initial).await;
            return;
        }
        if let Some(attempt) = self.scheduler.begin_immediate() {
            tracing::info!(attempt, "Network back online, reconnecting now");
            self.start_attempt(AttemptKind::Reconnect { attempt }).await;
        }
    }

    // ------------------------------------------------------------------
    // Traffic
    // ------------------------------------------------------------------

    async fn on_send(&mut self, message: OutboundMessage) -> Result<(), SessionError> {
        let Some(connection) = &self.connection else {
            return Err(SessionError::NotConnected);
        };
        let adapter = connection.adapter();

        self.emit(ClientEvent::LocalEcho {
            message: message.to_echo(),
        })
        .await;

        let message_id = message.id().clone();
        let content = message.content().to_string();
        let delivery = adapter.send(OutboundFrame::Message(message));
        let events = self.events.clone();
        tokio::spawn(async move {
            let event = match delivery.await {
                Ok(()) => ClientEvent::Sent { message_id },
                Err(e) => {
                    tracing::warn!(message_id = %message_id, error = %e, "Send failed");
                    ClientEvent::SendFailed {
                        message_id,
                        content,
                        error: e.to_string(),
                    }
                }
            };
            let _ = events.send(event).await;
        });
        Ok(())
    }

    async fn on_inbound(&mut self, event: Option<AdapterEvent>) {
        match event {
            Some(AdapterEvent::Frame(frame)) => self.on_frame(frame).await,
            Some(AdapterEvent::Malformed(reason)) => {
                let error = SessionError::MalformedFrame(reason);
                tracing::debug!(error = %error, "Frame dropped, connection kept");
            }
            Some(event @ AdapterEvent::Closed { .. }) => {
                let abnormal = event.is_abnormal_close();
                let AdapterEvent::Closed { code, reason } = event else {
                    return;
                };
                // A normal close from the server still reconnects; the session is wanted.
                let reason = match (code, abnormal) {
                    (Some(code), true) => format!("closed abnormally ({code}): {reason}"),
                    (None, _) => format!("closed without a code: {reason}"),
                    (Some(code), false) => format!("closed by server ({code}): {reason}"),
                };
                self.on_connection_lost(&reason).await;
            }
            None => self.on_connection_lost("inbound channel ended").await,
        }
    }

    async fn on_frame(&mut self, frame: InboundFrame) {
        if let InboundFrame::Message(message) = &frame {
            if message.kind == MessageKind::User {
                // Already shown through the local echo.
                tracing::trace!(message_id = %message.id, "Skipping server copy of own message");
                return;
            }
        }

        let now_ms = Utc::now().timestamp_millis();
        for event in self.assembler.apply(frame, now_ms) {
            if let ClientEvent::Latency { millis } = &event {
                let millis = *millis;
                self.latency_tx.send_replace(Some(millis));
            }
            self.emit(event).await;
        }
    }

    fn on_ping(&mut self) {
        let Some(connection) = &self.connection else {
            return;
        };
        let probe = connection.adapter().send(OutboundFrame::Ping {
            sent_at_ms: Utc::now().timestamp_millis(),
        });
        tokio::spawn(async move {
            if let Err(e) = probe.await {
                tracing::debug!(error = %e, "Heartbeat ping failed");
            }
        });
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn set_state(&mut self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            tracing::debug!(state = ?state, "Connection state changed");
            self.emit(ClientEvent::StateChanged(state)).await;
        }
    }

    async fn emit(&self, event: ClientEvent) {
        if self.events.send(event).await.is_err() {
            tracing::trace!("Host dropped the event stream");
        }
    }

    async fn shutdown(&mut self) {
        if let Some(flight) = self.in_flight.take() {
            flight.handle.abort();
        }
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        tracing::debug!("Session client driver stopped");
    }
}

/// Create the session if needed, then select a transport
async fn run_attempt(
    epoch: u64,
    selector: TransportSelector,
    api: Arc<dyn SessionApi>,
    existing: Option<Session>,
) -> AttemptOutcome {
    let (session, created) = match existing {
        Some(session) => (session, false),
        None => match api.create().await {
            Ok(session) => (session, true),
            Err(e) => {
                tracing::error!(error = %e, "Session creation failed");
                return AttemptOutcome {
                    epoch,
                    session: None,
                    history: None,
                    result: Err(e.into()),
                };
            }
        },
    };

    if !created {
        let result = selector.acquire(&session.id).await;
        return AttemptOutcome {
            epoch,
            session: Some(session),
            history: None,
            result,
        };
    }

    let (history, result) = tokio::join!(
        api.fetch_history(&session.id),
        selector.acquire(&session.id)
    );
    let history = history.unwrap_or_else(|e| {
        tracing::warn!(session_id = %session.id, error = %e, "History prefetch failed");
        Vec::new()
    });
    AttemptOutcome {
        epoch,
        session: Some(session),
        history: Some(history),
        result,
    }
}

fn ping_interval(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_connection_event(connection: &mut Option<Connection>) -> Option<AdapterEvent> {
    match connection {
        Some(connection) => connection.next_event().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_network_change(
    subscription: &mut Option<NetworkSubscription>,
) -> Option<NetworkStatus> {
    match subscription {
        Some(subscription) => subscription.changed().await,
        None => std::future::pending().await,
    }
}
