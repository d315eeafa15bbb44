//! Frame Codec
//!
//! Inbound frames are JSON objects tagged by a `type` field. Their payload
//! sits either inline or under a `data` object, depending on which server
//! endpoint produced them:
//!
//! ```text
//! {"type": "stream_chunk", "message_id": "m1", "content": "Hel"}
//! {"type": "streaming_chunk", "data": {"message_id": "m1", "content": "lo", "is_final": true}}
//! {"type": "heartbeat", "timestamp": 1234.5, "echo": 1700000000000}
//! ```
//!
//! The socket endpoint also answers with bare message records that carry no
//! `type` at all; anything with `content` and no tag is read as a complete
//! message.
//!
//! Both transports share this codec, so a frame means the same thing no
//! matter how it arrived.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::messages::{AssembledMessage, MessageId, MessageKind, MessageStatus, OutboundMessage};
use crate::transport::traits::TransportError;

/// A decoded inbound frame
#[derive(Clone, Debug, PartialEq)]
pub enum InboundFrame {
    /// A complete, non-streamed message
    Message(AssembledMessage),
    /// One piece of a streamed message
    StreamChunk {
        /// Message the chunk belongs to, when the server names it
        message_id: Option<MessageId>,
        /// Chunk text
        content: String,
        /// The server marked this as the last chunk
        is_final: bool,
    },
    /// The streamed message is complete
    StreamComplete {
        /// Message that completed, when the server names it
        message_id: Option<MessageId>,
    },
    /// Keep-alive, optionally echoing a client ping timestamp
    Heartbeat {
        /// Client send time (ms since epoch) echoed back by the server
        echo: Option<i64>,
    },
    /// Server-reported error
    Error {
        /// Error text
        message: String,
    },
    /// Assistant typing indicator
    Typing {
        /// Whether the assistant is typing
        is_typing: bool,
        /// Optional status text
        message: Option<String>,
    },
    /// Server streaming progress
    StreamProgress {
        /// Characters sent so far
        characters_sent: u64,
        /// Total characters, when known
        total_characters: Option<u64>,
    },
}

/// A frame the client writes to the wire
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    /// A user or system message
    Message(OutboundMessage),
    /// Latency probe carrying the client send time
    Ping {
        /// Milliseconds since the Unix epoch
        sent_at_ms: i64,
    },
}

impl OutboundFrame {
    /// Encode for a bidirectional channel
    pub fn encode(&self) -> Result<String, TransportError> {
        let value = match self {
            Self::Message(msg) => json!({
                "type": "message",
                "id": msg.id().0,
                "content": msg.content(),
                "message_type": msg.kind().as_str(),
            }),
            Self::Ping { sent_at_ms } => json!({
                "type": "ping",
                "sent_at": sent_at_ms,
            }),
        };
        serde_json::to_string(&value)
            .map_err(|e| TransportError::SendFailed(format!("Encode error: {e}")))
    }

    /// Request body for a discrete send call, if this frame has one
    #[must_use]
    pub fn call_body(&self) -> Option<Value> {
        match self {
            Self::Message(msg) => Some(json!({
                "content": msg.content(),
                "message_type": msg.kind().as_str(),
            })),
            Self::Ping { .. } => None,
        }
    }
}

/// Message record as the server serializes it
#[derive(Debug, Deserialize)]
pub(crate) struct WireMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    content: String,
    #[serde(default, alias = "kind")]
    message_type: Option<String>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    status: Option<String>,
}

impl WireMessage {
    /// Convert into the client model, using `status` when the record has none
    pub(crate) fn into_assembled(self, status: MessageStatus) -> AssembledMessage {
        let id = match self.id {
            Some(Value::String(s)) => MessageId(s),
            Some(Value::Number(n)) => MessageId(n.to_string()),
            _ => MessageId::new(),
        };
        AssembledMessage {
            id,
            kind: self
                .message_type
                .as_deref()
                .map_or(MessageKind::Assistant, MessageKind::from_wire),
            content: self.content,
            status: self
                .status
                .as_deref()
                .map_or(status, MessageStatus::from_wire),
            timestamp: self
                .timestamp
                .as_ref()
                .and_then(Value::as_str)
                .and_then(parse_timestamp)
                .unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default, alias = "text")]
    content: String,
    #[serde(default)]
    is_final: bool,
}

#[derive(Debug, Default, Deserialize)]
struct CompletePayload {
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TypingPayload {
    #[serde(default = "default_true")]
    is_typing: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProgressPayload {
    #[serde(default)]
    characters_sent: u64,
    #[serde(default)]
    total_characters: Option<u64>,
}

fn default_true() -> bool {
    true
}

/// Parse server timestamps, with or without a UTC offset
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn payload<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, TransportError> {
    serde_json::from_value(value).map_err(|e| TransportError::MalformedFrame(e.to_string()))
}

fn str_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Decode one inbound frame
///
/// Fails with [`TransportError::MalformedFrame`] for anything that is not a
/// recognizable frame; callers drop that frame and keep the connection.
pub fn decode(text: &str) -> Result<InboundFrame, TransportError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| TransportError::MalformedFrame(e.to_string()))?;
    let Value::Object(outer) = value else {
        return Err(TransportError::MalformedFrame(
            "frame is not a JSON object".to_string(),
        ));
    };

    let kind = outer.get("type").and_then(Value::as_str).map(str::to_string);
    let body = match outer.get("data") {
        Some(Value::Object(inner)) => inner.clone(),
        _ => outer.clone(),
    };

    let frame = match kind.as_deref() {
        Some("message") => InboundFrame::Message(
            payload::<WireMessage>(Value::Object(body))?.into_assembled(MessageStatus::Received),
        ),
        Some("stream_chunk" | "streaming_chunk") => {
            let chunk: ChunkPayload = payload(Value::Object(body))?;
            InboundFrame::StreamChunk {
                message_id: chunk.message_id.map(MessageId),
                content: chunk.content,
                is_final: chunk.is_final,
            }
        }
        Some("stream_complete") => {
            let done: CompletePayload = payload(Value::Object(body))?;
            InboundFrame::StreamComplete {
                message_id: done.message_id.map(MessageId),
            }
        }
        Some("heartbeat" | "pong") => InboundFrame::Heartbeat {
            echo: body.get("echo").and_then(Value::as_i64),
        },
        Some("error" | "validation_error" | "processing_error") => InboundFrame::Error {
            message: str_field(&body, &["message", "error"])
                .or_else(|| str_field(&outer, &["message", "error"]))
                .unwrap_or_else(|| "Unknown server error".to_string()),
        },
        Some("typing_indicator") => {
            let typing: TypingPayload = payload(Value::Object(body))?;
            InboundFrame::Typing {
                is_typing: typing.is_typing,
                message: typing.message,
            }
        }
        Some("streaming_status") => {
            let progress: ProgressPayload = payload(Value::Object(body))?;
            InboundFrame::StreamProgress {
                characters_sent: progress.characters_sent,
                total_characters: progress.total_characters,
            }
        }
        Some(other) => {
            return Err(TransportError::MalformedFrame(format!(
                "unknown frame type {other:?}"
            )))
        }
        None if outer.contains_key("content") => InboundFrame::Message(
            payload::<WireMessage>(Value::Object(outer))?.into_assembled(MessageStatus::Received),
        ),
        None => {
            return Err(TransportError::MalformedFrame(
                "frame has no type".to_string(),
            ))
        }
    };

    Ok(frame)
}
