//! Session Errors
//!
//! The error taxonomy surfaced by the session client. Only
//! [`SessionError::TransportUnavailable`] (at the initial connect) and
//! [`SessionError::ReconnectExhausted`] are meant to reach the user as
//! fatal; everything else degrades one frame or one send.

use thiserror::Error;

use crate::session::ApiError;
use crate::transport::TransportError;

/// Errors returned by the session client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Both the socket and the event-stream transports failed to open
    #[error("No transport available (socket: {socket}; stream: {stream})")]
    TransportUnavailable {
        /// Why the socket transport failed
        socket: String,
        /// Why the event-stream transport failed
        stream: String,
    },

    /// Send attempted with no open connection
    #[error("Not connected")]
    NotConnected,

    /// A single send failed or timed out
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// A single inbound frame could not be decoded
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Overlapping or contradictory stream states
    #[error("Protocol conflict: {0}")]
    ProtocolConflict(String),

    /// Reconnection gave up; the client must be reset
    #[error("Reconnection failed after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Connecting failed before a transport was tried (e.g. session creation)
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Content was empty or whitespace only
    #[error("Message is empty")]
    EmptyMessage,

    /// Content exceeds the configured length limit
    #[error("Message too long: {length} characters (max {max})")]
    MessageTooLong {
        /// Length of the rejected content, in characters
        length: usize,
        /// Configured maximum
        max: usize,
    },

    /// The client's driver task is no longer running
    #[error("Session client has shut down")]
    ClientShutdown,
}

impl SessionError {
    /// Whether this error should be shown to the user as fatal
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::TransportUnavailable { .. } | Self::ReconnectExhausted { .. }
        )
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => Self::NotConnected,
            TransportError::MalformedFrame(msg) => Self::MalformedFrame(msg),
            TransportError::SendFailed(msg) => Self::SendFailed(msg),
            other => Self::SendFailed(other.to_string()),
        }
    }
}

impl From<ApiError> for SessionError {
    fn from(err: ApiError) -> Self {
        Self::ConnectionFailed(err.to_string())
    }
}
