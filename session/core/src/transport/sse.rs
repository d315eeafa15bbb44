//! Event-Stream Decoder
//!
//! Incremental parser for `text/event-stream` bodies. Bytes arrive in
//! arbitrary chunks from the HTTP body; the decoder buffers them and yields
//! one [`SseEvent`] per blank-line-terminated block.
//!
//! ```text
//! event: message        <- optional
//! data: {"type": ...}   <- repeated data lines are joined with '\n'
//! <blank line>          <- dispatch
//! ```
//!
//! Comment lines (leading `:`) are skipped. Blocks without data are not
//! dispatched.

use super::TransportError;

/// Maximum size of one undispatched event (1 MB)
pub const MAX_EVENT_SIZE: usize = 1024 * 1024;

/// Minimum buffer capacity for decoder
const MIN_BUFFER_CAPACITY: usize = 4096;

/// One dispatched server-sent event
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name from an `event:` field
    pub event: Option<String>,
    /// Data lines joined with `\n`
    pub data: String,
    /// Last `id:` field seen in the block
    pub id: Option<String>,
}

/// Decoder state machine for event-stream parsing
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    read_pos: usize,
    pending: SseEvent,
    has_data: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    /// Create a new decoder
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
            pending: SseEvent::default(),
            has_data: false,
        }
    }

    /// Append bytes to the buffer
    pub fn push(&mut self, data: &[u8]) {
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next event
    ///
    /// Returns `Ok(None)` when more data is needed. Fails only when one event
    /// grows past [`MAX_EVENT_SIZE`]; the decoder is cleared in that case.
    pub fn next_event(&mut self) -> Result<Option<SseEvent>, TransportError> {
        loop {
            let unread = &self.buffer[self.read_pos..];
            let Some(newline) = unread.iter().position(|b| *b == b'\n') else {
                if unread.len() + self.pending.data.len() > MAX_EVENT_SIZE {
                    self.clear();
                    return Err(TransportError::MalformedFrame(format!(
                        "event exceeds {MAX_EVENT_SIZE} bytes"
                    )));
                }
                return Ok(None);
            };

            let mut line = &unread[..newline];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            let line = String::from_utf8_lossy(line).into_owned();
            self.read_pos += newline + 1;

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    return Ok(Some(event));
                }
                continue;
            }
            self.apply_line(&line);
        }
    }

    fn apply_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                if self.has_data {
                    self.pending.data.push('\n');
                }
                self.pending.data.push_str(value);
                self.has_data = true;
            }
            "event" => self.pending.event = Some(value.to_string()),
            "id" => self.pending.id = Some(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = std::mem::take(&mut self.pending);
        let had_data = std::mem::replace(&mut self.has_data, false);
        had_data.then_some(event)
    }

    /// Clear buffered bytes and any partial event
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
        self.pending = SseEvent::default();
        self.has_data = false;
    }
}
