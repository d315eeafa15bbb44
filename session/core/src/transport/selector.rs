//! Transport Selector
//!
//! Acquires one open [`Connection`] for a session by probing transports in
//! order: the socket first, then the event stream.
//!
//! ```text
//! acquire(id)
//!    │
//!    ├─► socket.open()  ── within open_timeout ──► Connection(socket)
//!    │        │ timeout / error: close partial adapter
//!    ▼        ▼
//!    ├─► stream.open()  ── within open_timeout ──► Connection(stream)
//!    │        │ timeout / error
//!    ▼        ▼
//!  TransportUnavailable { socket, stream }
//! ```
//!
//! Every call starts again from the socket. A timed-out open is dropped
//! mid-flight, so its late completion can never surface as a connection.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::messages::SessionId;

use super::config::{TransportConfig, TransportKind};
use super::factory::AdapterFactory;
use super::traits::{AdapterEvent, TransportError, WireAdapter};

/// Lifecycle of one connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Opening
    Connecting,
    /// Inbound channel open
    Open,
    /// Closed by either side
    Closed,
}

/// One open transport for a session
///
/// Exactly one is active per client; it is closed before a replacement is
/// acquired.
pub struct Connection {
    transport_kind: TransportKind,
    phase: ConnectionPhase,
    opened_at: DateTime<Utc>,
    adapter: Arc<dyn WireAdapter>,
    events: mpsc::Receiver<AdapterEvent>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("transport_kind", &self.transport_kind)
            .field("phase", &self.phase)
            .field("opened_at", &self.opened_at)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Wrap an adapter whose open just succeeded
    pub fn new(adapter: Arc<dyn WireAdapter>, events: mpsc::Receiver<AdapterEvent>) -> Self {
        Self {
            transport_kind: adapter.kind(),
            phase: ConnectionPhase::Open,
            opened_at: Utc::now(),
            adapter,
            events,
        }
    }

    /// Transport that won selection
    #[must_use]
    pub fn transport_kind(&self) -> TransportKind {
        self.transport_kind
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// When the transport opened
    #[must_use]
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Shared handle to the adapter, for sends
    #[must_use]
    pub fn adapter(&self) -> Arc<dyn WireAdapter> {
        Arc::clone(&self.adapter)
    }

    /// Next inbound event; `None` once the adapter dropped its channel
    pub async fn next_event(&mut self) -> Option<AdapterEvent> {
        let event = self.events.recv().await;
        if matches!(event, None | Some(AdapterEvent::Closed { .. })) {
            self.phase = ConnectionPhase::Closed;
        }
        event
    }

    /// Close the adapter; safe to call repeatedly
    pub async fn close(&mut self) {
        self.phase = ConnectionPhase::Closed;
        self.events.close();
        self.adapter.close().await;
    }
}

/// Probes transports in order and hands out the first that opens
#[derive(Clone)]
pub struct TransportSelector {
    config: TransportConfig,
    factory: Arc<dyn AdapterFactory>,
}

impl TransportSelector {
    /// Create a selector over the given adapter source
    pub fn new(config: TransportConfig, factory: Arc<dyn AdapterFactory>) -> Self {
        Self { config, factory }
    }

    /// Open a connection for `session_id`
    ///
    /// Fails with [`SessionError::TransportUnavailable`] only when every
    /// enabled transport failed to open.
    pub async fn acquire(&self, session_id: &SessionId) -> Result<Connection, SessionError> {
        let mut socket_failure = "disabled".to_string();
        let mut stream_failure = "not attempted".to_string();

        for kind in self.config.probe_order() {
            match self.try_open(kind, session_id).await {
                Ok(connection) => {
                    tracing::info!(
                        session_id = %session_id,
                        transport = %kind,
                        "Transport selected"
                    );
                    return Ok(connection);
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %session_id,
                        transport = %kind,
                        error = %e,
                        "Transport failed to open"
                    );
                    match kind {
                        TransportKind::Socket => socket_failure = e.to_string(),
                        TransportKind::Stream => stream_failure = e.to_string(),
                    }
                }
            }
        }

        Err(SessionError::TransportUnavailable {
            socket: socket_failure,
            stream: stream_failure,
        })
    }

    async fn try_open(
        &self,
        kind: TransportKind,
        session_id: &SessionId,
    ) -> Result<Connection, TransportError> {
        let adapter = self.factory.create(kind);
        let budget = self.config.open_timeout();
        tracing::debug!(transport = %kind, timeout_ms = budget.as_millis() as u64, "Opening transport");

        match tokio::time::timeout(budget, adapter.open(session_id)).await {
            Ok(Ok(events)) => Ok(Connection::new(adapter, events)),
            Ok(Err(e)) => {
                adapter.close().await;
                Err(e)
            }
            Err(_) => {
                adapter.close().await;
                Err(TransportError::OpenTimeout(budget))
            }
        }
    }
}
