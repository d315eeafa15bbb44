//! Session Messages
//!
//! The data model shared by every layer of the client: outbound messages
//! written to the wire, assembled messages handed to the host application,
//! and the [`ClientEvent`] stream the host observes.
//!
//! # Ownership
//!
//! - [`OutboundMessage`] is immutable once built and is moved into the
//!   active adapter on send.
//! - [`AssembledMessage`] is mutable only while it is the assembler's
//!   in-progress message; once finalized it is cloned out to the host and
//!   never touched again.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::transport::TransportKind;

/// Session identifier, issued by the server's session-creation endpoint
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Message identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Who produced a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Typed by the local user
    User,
    /// Produced by the assistant on the server
    Assistant,
    /// System notice
    System,
    /// Error notice
    Error,
}

impl MessageKind {
    /// Wire name used by the server (`message_type`)
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Error => "error",
        }
    }

    /// Parse a server `message_type` string; unknown values map to `System`
    #[must_use]
    pub fn from_wire(value: &str) -> Self {
        match value {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            "error" => Self::Error,
            _ => Self::System,
        }
    }
}

/// Lifecycle of a message as seen by the host
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Local echo written, or a stream still growing
    Sending,
    /// Accepted by the transport
    Sent,
    /// Complete and immutable
    Received,
    /// Failed to send, or replaced by a protocol error
    Error,
}

impl MessageStatus {
    /// Map a server status string onto the client lifecycle
    ///
    /// The server tracks a richer set (`pending`, `processing`,
    /// `streaming`, `completed`, ...); everything that is not clearly
    /// in-flight or failed is treated as received.
    #[must_use]
    pub fn from_wire(value: &str) -> Self {
        match value {
            "sending" | "streaming" => Self::Sending,
            "sent" => Self::Sent,
            "failed" | "error" => Self::Error,
            _ => Self::Received,
        }
    }
}

/// A message headed to the server
///
/// Immutable once constructed; ownership moves into the adapter on send.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    id: MessageId,
    content: String,
    kind: MessageKind,
    sent_at: DateTime<Utc>,
}

impl OutboundMessage {
    /// Build an outbound message of the given kind
    pub fn new(content: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            id: MessageId::new(),
            content: content.into(),
            kind,
            sent_at: Utc::now(),
        }
    }

    /// Build a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(content, MessageKind::User)
    }

    /// Build a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(content, MessageKind::System)
    }

    /// Local identifier (used to correlate echo, ack and failure events)
    #[must_use]
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Message text
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Message kind
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// When the message was constructed
    #[must_use]
    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    /// The local-echo view of this message
    #[must_use]
    pub fn to_echo(&self) -> AssembledMessage {
        AssembledMessage {
            id: self.id.clone(),
            kind: self.kind,
            content: self.content.clone(),
            status: MessageStatus::Sending,
            timestamp: self.sent_at,
        }
    }
}

/// A logical message as presented to the host application
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledMessage {
    /// Message identifier (server-assigned for inbound messages)
    pub id: MessageId,
    /// Who produced it
    pub kind: MessageKind,
    /// Final content, or partial content while streaming
    pub content: String,
    /// Lifecycle status
    pub status: MessageStatus,
    /// Creation time
    pub timestamp: DateTime<Utc>,
}

impl AssembledMessage {
    /// A fresh, empty assistant message for an incoming stream
    #[must_use]
    pub fn streaming(id: MessageId) -> Self {
        Self {
            id,
            kind: MessageKind::Assistant,
            content: String::new(),
            status: MessageStatus::Sending,
            timestamp: Utc::now(),
        }
    }

    /// Whether this message is still receiving chunks
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.status == MessageStatus::Sending
    }
}

/// Observable connection state of the session client
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection and none requested
    Disconnected,
    /// Initial connect in progress
    Connecting,
    /// A transport is open
    Connected(TransportKind),
    /// Connection lost, backoff in progress
    Reconnecting {
        /// Attempt about to run (1-indexed)
        attempt: u32,
        /// Attempt budget
        max_attempts: u32,
    },
    /// The host reported the network as offline
    Offline,
    /// Reconnection exhausted; a manual reset is required
    Failed,
}

impl ConnectionState {
    /// Human-readable description
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting...",
            Self::Connected(_) => "Connected",
            Self::Reconnecting { .. } => "Reconnecting...",
            Self::Offline => "Offline",
            Self::Failed => "Connection failed",
        }
    }

    /// Whether a transport is currently open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

/// Events delivered from the session client to the host application
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    // ============================================
    // Connection Events
    // ============================================
    /// A transport opened
    Connected {
        /// Which transport won selection
        transport: TransportKind,
        /// Whether this came from the reconnection path
        reconnected: bool,
    },

    /// Connection state changed
    StateChanged(ConnectionState),

    /// A reconnection attempt is scheduled
    ReconnectScheduled {
        /// Attempt number (1-indexed)
        attempt: u32,
        /// Delay before the attempt runs
        delay: Duration,
    },

    /// All reconnection attempts failed; emitted exactly once per exhaustion
    ReconnectExhausted {
        /// Attempts made
        attempts: u32,
    },

    /// Rolling round-trip latency estimate changed
    Latency {
        /// Mean of the sample window, in milliseconds
        millis: u64,
    },

    // ============================================
    // Conversation Events
    // ============================================
    /// Prior messages fetched at session start
    History {
        /// Messages in server order
        messages: Vec<AssembledMessage>,
    },

    /// Optimistic echo of a message the user just sent
    LocalEcho {
        /// The echoed message (status `Sending`)
        message: AssembledMessage,
    },

    /// The transport accepted an outbound message
    Sent {
        /// Local ID of the message
        message_id: MessageId,
    },

    /// An outbound message could not be delivered
    SendFailed {
        /// Local ID of the message
        message_id: MessageId,
        /// Original content, so the host can offer a retry
        content: String,
        /// Error description
        error: String,
    },

    /// A streamed message grew
    Partial {
        /// Snapshot of the in-progress message
        message: AssembledMessage,
    },

    /// A complete logical message arrived
    Message {
        /// The final, immutable message
        message: AssembledMessage,
    },

    /// Conflicting stream states were detected
    ProtocolConflict {
        /// Message the conflict was detected on
        message_id: Option<MessageId>,
        /// What conflicted, as [`SessionError::ProtocolConflict`]
        error: SessionError,
    },

    /// The server reported an error
    ServerError {
        /// Error text from the server
        message: String,
    },

    /// Assistant typing indicator
    Typing {
        /// Whether the assistant is typing
        is_typing: bool,
        /// Optional status text
        message: Option<String>,
    },

    /// Server-side streaming progress
    StreamProgress {
        /// Characters sent so far
        characters_sent: u64,
        /// Total characters, when known
        total_characters: Option<u64>,
    },
}
