//! Transport Traits
//!
//! The capability set every wire adapter implements: open, send, an inbound
//! event stream (messages plus close/error lifecycle), and close.
//!
//! Adapters are shared behind `Arc<dyn WireAdapter>` so that in-flight sends
//! can run on their own tasks while the session driver keeps reading the
//! inbound stream; every method therefore takes `&self`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::messages::SessionId;
use crate::transport::config::TransportKind;
use crate::transport::frame::{self, InboundFrame, OutboundFrame};

/// Errors that can occur during transport operations
#[derive(Debug)]
pub enum TransportError {
    /// Connection to the server failed before it opened
    ConnectionFailed(String),
    /// The open handshake did not finish in time
    OpenTimeout(Duration),
    /// Operation requires an open connection
    NotConnected,
    /// Failed to deliver an outbound frame
    SendFailed(String),
    /// The outbound call did not complete in time
    SendTimeout,
    /// A single inbound frame could not be decoded
    MalformedFrame(String),
    /// Transport not in expected state
    InvalidState(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed(msg) => write!(f, "Connection failed: {msg}"),
            Self::OpenTimeout(after) => {
                write!(f, "Open timed out after {}ms", after.as_millis())
            }
            Self::NotConnected => write!(f, "Not connected"),
            Self::SendFailed(msg) => write!(f, "Send failed: {msg}"),
            Self::SendTimeout => write!(f, "Send timed out"),
            Self::MalformedFrame(msg) => write!(f, "Malformed frame: {msg}"),
            Self::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Lifecycle and data events produced by an open adapter
///
/// Events arrive strictly in wire order. The channel ends after `Closed`.
#[derive(Debug)]
pub enum AdapterEvent {
    /// A decoded inbound frame
    Frame(InboundFrame),
    /// One inbound frame could not be decoded and was dropped
    Malformed(String),
    /// The inbound channel closed
    Closed {
        /// Close code, when the transport has one
        code: Option<u16>,
        /// Close reason
        reason: String,
    },
}

/// WebSocket close code for a normal closure
pub const NORMAL_CLOSE_CODE: u16 = 1000;

impl AdapterEvent {
    /// Decode one text payload; failures become [`AdapterEvent::Malformed`]
    #[must_use]
    pub fn decode(text: &str) -> Self {
        match frame::decode(text) {
            Ok(frame) => Self::Frame(frame),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame");
                Self::Malformed(e.to_string())
            }
        }
    }

    /// Whether this is a close with a non-normal (or missing) code
    #[must_use]
    pub fn is_abnormal_close(&self) -> bool {
        matches!(self, Self::Closed { code, .. } if *code != Some(NORMAL_CLOSE_CODE))
    }
}

/// A concrete transport behind the uniform adapter interface
#[async_trait]
pub trait WireAdapter: Send + Sync {
    /// Which transport this adapter speaks
    fn kind(&self) -> TransportKind;

    /// Open the channel for `session_id`
    ///
    /// Resolves once the inbound channel is open; the returned receiver
    /// yields inbound frames and the close event.
    async fn open(
        &self,
        session_id: &SessionId,
    ) -> Result<mpsc::Receiver<AdapterEvent>, TransportError>;

    /// Start sending one frame
    ///
    /// The frame is committed to the adapter before this returns, so calls
    /// made in order are written in order where the transport allows it.
    /// The returned future resolves when delivery is confirmed or failed.
    fn send(&self, frame: OutboundFrame) -> BoxFuture<'static, Result<(), TransportError>>;

    /// Close the channel; safe to call repeatedly
    async fn close(&self);

    /// Whether the inbound channel is currently open
    fn is_open(&self) -> bool;
}
