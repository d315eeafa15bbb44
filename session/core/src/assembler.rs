//! Message Stream Assembler
//!
//! Reduces inbound frames into host-facing events. Streamed replies arrive
//! as chunks and are concatenated, in arrival order, into at most one
//! in-progress [`AssembledMessage`]; `stream_complete` freezes it.
//!
//! # Transitions
//!
//! | Frame             | Nothing in progress        | Message in progress                  |
//! |-------------------|----------------------------|--------------------------------------|
//! | `stream_chunk`    | start message, `Partial`   | same id: append, `Partial`           |
//! |                   |                            | other id: `ProtocolConflict`, drop   |
//! | `stream_complete` | no-op (logged)             | same id: `Message`, clear slot       |
//! |                   |                            | other id: `ProtocolConflict`         |
//! | `message`         | `Message`                  | `ProtocolConflict`, fail in-progress |
//! | `error`           | `ServerError`              | fail in-progress, `ServerError`      |
//! | `heartbeat`       | `Latency` when echoed      | `Latency` when echoed                |
//!
//! A chunk or completion without a message id belongs to whatever is in
//! progress. Chunks are never reordered or deduplicated.

use crate::error::SessionError;
use crate::latency::{rtt_from_echo, LatencyWindow};
use crate::messages::{AssembledMessage, ClientEvent, MessageId, MessageStatus};
use crate::transport::InboundFrame;

/// The message currently being streamed
#[derive(Debug)]
struct InProgress {
    message: AssembledMessage,
    /// Whether `message.id` came from the server rather than being generated
    server_id: bool,
}

impl InProgress {
    /// Whether a frame naming `id` belongs to this message
    fn owns(&self, id: Option<&MessageId>) -> bool {
        match id {
            None => true,
            Some(id) => !self.server_id || self.message.id == *id,
        }
    }
}

/// Inbound frame reducer
#[derive(Debug)]
pub struct MessageAssembler {
    in_progress: Option<InProgress>,
    latency: LatencyWindow,
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new(10)
    }
}

impl MessageAssembler {
    /// Create an assembler averaging latency over `latency_window` samples
    #[must_use]
    pub fn new(latency_window: usize) -> Self {
        Self {
            in_progress: None,
            latency: LatencyWindow::new(latency_window),
        }
    }

    /// The message currently being streamed
    #[must_use]
    pub fn in_progress(&self) -> Option<&AssembledMessage> {
        self.in_progress.as_ref().map(|p| &p.message)
    }

    /// Current latency estimate
    #[must_use]
    pub fn latency_millis(&self) -> Option<u64> {
        self.latency.mean_millis()
    }

    /// Apply one frame; `now_ms` is the receive time in ms since the epoch
    pub fn apply(&mut self, frame: InboundFrame, now_ms: i64) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        match frame {
            InboundFrame::StreamChunk {
                message_id,
                content,
                is_final,
            } => {
                let accepted = self.on_chunk(message_id.clone(), &content, &mut events);
                if accepted && is_final {
                    self.on_complete(message_id, &mut events);
                }
            }
            InboundFrame::StreamComplete { message_id } => self.on_complete(message_id, &mut events),
            InboundFrame::Message(message) => self.on_message(message, &mut events),
            InboundFrame::Heartbeat { echo } => {
                if let Some(rtt) = echo.and_then(|sent| rtt_from_echo(sent, now_ms)) {
                    let millis = self.latency.record(rtt);
                    tracing::trace!(rtt_ms = rtt.as_millis() as u64, mean_ms = millis, "Latency sample");
                    events.push(ClientEvent::Latency { millis });
                }
            }
            InboundFrame::Error { message } => {
                tracing::warn!(error = %message, "Server reported error");
                if let Some(failed) = self.fail_in_progress() {
                    events.push(ClientEvent::Message { message: failed });
                }
                events.push(ClientEvent::ServerError { message });
            }
            InboundFrame::Typing { is_typing, message } => {
                events.push(ClientEvent::Typing { is_typing, message });
            }
            InboundFrame::StreamProgress {
                characters_sent,
                total_characters,
            } => events.push(ClientEvent::StreamProgress {
                characters_sent,
                total_characters,
            }),
        }
        events
    }

    /// Fail the in-progress message because its connection went away
    pub fn abandon(&mut self, reason: &str) -> Option<ClientEvent> {
        let failed = self.fail_in_progress()?;
        tracing::warn!(message_id = %failed.id, %reason, "Abandoning in-progress message");
        Some(ClientEvent::Message { message: failed })
    }

    /// Drop all state, including latency samples
    pub fn reset(&mut self) {
        self.in_progress = None;
        self.latency.clear();
    }

    /// Returns false when the chunk was rejected
    fn on_chunk(
        &mut self,
        message_id: Option<MessageId>,
        content: &str,
        events: &mut Vec<ClientEvent>,
    ) -> bool {
        if let Some(current) = self.in_progress.as_ref() {
            if !current.owns(message_id.as_ref()) {
                tracing::warn!(
                    in_progress = %current.message.id,
                    incoming = ?message_id,
                    "Chunk for a different message while one is in progress"
                );
                events.push(ClientEvent::ProtocolConflict {
                    error: SessionError::ProtocolConflict(format!(
                        "chunk arrived while message {} is still streaming",
                        current.message.id
                    )),
                    message_id,
                });
                return false;
            }
        }

        let current = self.in_progress.get_or_insert_with(|| InProgress {
            message: AssembledMessage::streaming(message_id.clone().unwrap_or_default()),
            server_id: message_id.is_some(),
        });

        if let (Some(id), false) = (message_id, current.server_id) {
            current.message.id = id;
            current.server_id = true;
        }
        current.message.content.push_str(content);
        events.push(ClientEvent::Partial {
            message: current.message.clone(),
        });
        true
    }

    fn on_complete(&mut self, message_id: Option<MessageId>, events: &mut Vec<ClientEvent>) {
        let Some(current) = self.in_progress.as_ref() else {
            tracing::debug!(message_id = ?message_id, "stream_complete with nothing in progress");
            return;
        };

        if !current.owns(message_id.as_ref()) {
            tracing::warn!(
                in_progress = %current.message.id,
                incoming = ?message_id,
                "stream_complete for a different message"
            );
            events.push(ClientEvent::ProtocolConflict {
                message_id,
                error: SessionError::ProtocolConflict(format!(
                    "completion does not match streaming message {}",
                    current.message.id
                )),
            });
            return;
        }

        if let Some(done) = self.in_progress.take() {
            let mut message = done.message;
            message.status = MessageStatus::Received;
            events.push(ClientEvent::Message { message });
        }
    }

    fn on_message(&mut self, mut message: AssembledMessage, events: &mut Vec<ClientEvent>) {
        if let Some(failed) = self.fail_in_progress() {
            tracing::warn!(
                in_progress = %failed.id,
                incoming = %message.id,
                "Complete message arrived while another was streaming"
            );
            events.push(ClientEvent::ProtocolConflict {
                message_id: Some(failed.id.clone()),
                error: SessionError::ProtocolConflict(format!(
                    "complete message {} arrived while {} was streaming",
                    message.id, failed.id
                )),
            });
            events.push(ClientEvent::Message { message: failed });
            return;
        }

        message.status = MessageStatus::Received;
        events.push(ClientEvent::Message { message });
    }

    fn fail_in_progress(&mut self) -> Option<AssembledMessage> {
        let mut message = self.in_progress.take()?.message;
        message.status = MessageStatus::Error;
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageKind;
    use pretty_assertions::assert_eq;

    fn chunk(id: Option<&str>, content: &str) -> InboundFrame {
        InboundFrame::StreamChunk {
            message_id: id.map(MessageId::from),
            content: content.to_string(),
            is_final: false,
        }
    }

    fn complete(id: Option<&str>) -> InboundFrame {
        InboundFrame::StreamComplete {
            message_id: id.map(MessageId::from),
        }
    }

    fn completed_messages(events: &[ClientEvent]) -> Vec<AssembledMessage> {
        events
            .iter()
            .filter_map(|e| match e {
                ClientEvent::Message { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_chunks_concatenate_in_order() {
        let mut assembler = MessageAssembler::default();
        let parts = ["Hel", "lo, ", "", "wor", "ld"];
        let mut events = Vec::new();
        for part in parts {
            events.extend(assembler.apply(chunk(Some("m1"), part), 0));
        }
        events.extend(assembler.apply(complete(Some("m1")), 0));

        let done = completed_messages(&events);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].content, parts.concat());
        assert_eq!(done[0].status, MessageStatus::Received);
        assert_eq!(done[0].kind, MessageKind::Assistant);
        assert_eq!(done[0].id, MessageId::from("m1"));
        assert!(assembler.in_progress().is_none());
    }

    #[test]
    fn test_partial_event_per_chunk() {
        let mut assembler = MessageAssembler::default();
        let events = assembler.apply(chunk(Some("m1"), "ab"), 0);
        assert!(matches!(
            &events[..],
            [ClientEvent::Partial { message }] if message.content == "ab" && message.is_streaming()
        ));

        let events = assembler.apply(chunk(None, "c"), 0);
        assert!(matches!(
            &events[..],
            [ClientEvent::Partial { message }] if message.content == "abc"
        ));
    }

    #[test]
    fn test_complete_without_progress_is_noop() {
        let mut assembler = MessageAssembler::default();
        assert!(assembler.apply(complete(None), 0).is_empty());
        assert!(assembler.apply(complete(Some("m9")), 0).is_empty());
    }

    #[test]
    fn test_chunk_for_other_message_conflicts() {
        let mut assembler = MessageAssembler::default();
        assembler.apply(chunk(Some("m1"), "first"), 0);

        let events = assembler.apply(chunk(Some("m2"), "intruder"), 0);
        assert!(matches!(
            &events[..],
            [ClientEvent::ProtocolConflict { message_id: Some(id), error: SessionError::ProtocolConflict(detail) }]
                if id.0 == "m2" && detail.contains("m1")
        ));

        let current = assembler.in_progress().unwrap();
        assert_eq!(current.id, MessageId::from("m1"));
        assert_eq!(current.content, "first");
    }

    #[test]
    fn test_idless_stream_adopts_server_id() {
        let mut assembler = MessageAssembler::default();
        assembler.apply(chunk(None, "a"), 0);
        assembler.apply(chunk(Some("srv"), "b"), 0);
        assert_eq!(assembler.in_progress().unwrap().id, MessageId::from("srv"));

        let events = assembler.apply(chunk(Some("other"), "c"), 0);
        assert!(matches!(&events[..], [ClientEvent::ProtocolConflict { .. }]));
    }

    #[test]
    fn test_final_chunk_completes() {
        let mut assembler = MessageAssembler::default();
        assembler.apply(chunk(Some("m1"), "Hi"), 0);
        let events = assembler.apply(
            InboundFrame::StreamChunk {
                message_id: Some(MessageId::from("m1")),
                content: " there".to_string(),
                is_final: true,
            },
            0,
        );
        let done = completed_messages(&events);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].content, "Hi there");
    }

    #[test]
    fn test_mismatched_completion_conflicts() {
        let mut assembler = MessageAssembler::default();
        assembler.apply(chunk(Some("m1"), "x"), 0);
        let events = assembler.apply(complete(Some("m2")), 0);
        assert!(matches!(&events[..], [ClientEvent::ProtocolConflict { .. }]));
        assert!(assembler.in_progress().is_some());
    }

    #[test]
    fn test_complete_message_during_stream_conflicts() {
        let mut assembler = MessageAssembler::default();
        assembler.apply(chunk(Some("m1"), "partial"), 0);

        let mut incoming = AssembledMessage::streaming(MessageId::from("m2"));
        incoming.content = "whole".to_string();
        let events = assembler.apply(InboundFrame::Message(incoming), 0);

        assert!(matches!(events[0], ClientEvent::ProtocolConflict { .. }));
        let done = completed_messages(&events);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, MessageId::from("m1"));
        assert_eq!(done[0].status, MessageStatus::Error);
        assert!(assembler.in_progress().is_none());
    }

    #[test]
    fn test_complete_message_when_idle() {
        let mut assembler = MessageAssembler::default();
        let mut incoming = AssembledMessage::streaming(MessageId::from("m1"));
        incoming.content = "hello".to_string();
        let events = assembler.apply(InboundFrame::Message(incoming), 0);
        let done = completed_messages(&events);
        assert_eq!(done[0].status, MessageStatus::Received);
    }

    #[test]
    fn test_error_frame_fails_stream() {
        let mut assembler = MessageAssembler::default();
        assembler.apply(chunk(Some("m1"), "half"), 0);
        let events = assembler.apply(
            InboundFrame::Error {
                message: "model crashed".to_string(),
            },
            0,
        );
        assert_eq!(events.len(), 2);
        assert_eq!(completed_messages(&events)[0].status, MessageStatus::Error);
        assert!(matches!(&events[1], ClientEvent::ServerError { message } if message == "model crashed"));
    }

    #[test]
    fn test_heartbeat_latency() {
        let mut assembler = MessageAssembler::new(10);
        assert!(assembler
            .apply(InboundFrame::Heartbeat { echo: None }, 5_000)
            .is_empty());

        let events = assembler.apply(InboundFrame::Heartbeat { echo: Some(1_000) }, 1_040);
        assert_eq!(events, vec![ClientEvent::Latency { millis: 40 }]);
        let events = assembler.apply(InboundFrame::Heartbeat { echo: Some(2_000) }, 2_061);
        assert_eq!(events, vec![ClientEvent::Latency { millis: 51 }]);
        assert_eq!(assembler.latency_millis(), Some(51));

        // Echo from the future is ignored.
        assert!(assembler
            .apply(InboundFrame::Heartbeat { echo: Some(9_000) }, 1_000)
            .is_empty());
    }

    #[test]
    fn test_abandon() {
        let mut assembler = MessageAssembler::default();
        assert!(assembler.abandon("closed").is_none());
        assembler.apply(chunk(Some("m1"), "x"), 0);
        let event = assembler.abandon("closed").unwrap();
        assert!(matches!(event, ClientEvent::Message { message } if message.status == MessageStatus::Error));
        assert!(assembler.in_progress().is_none());
    }
}
