//! WebSocket Transport
//!
//! Primary transport: one persistent bidirectional socket per session.
//!
//! ```text
//!   send() ──► writer queue ──► writer task ──► sink
//!                                                 │
//!   events ◄── reader task ◄── stream ◄───────────┘
//! ```
//!
//! Sends are queued on an unbounded channel before `send` returns, so the
//! writer task writes frames in call order. Each queued frame carries a
//! oneshot that resolves once the write succeeded or failed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::messages::SessionId;
use crate::transport::config::{TransportConfig, TransportKind};
use crate::transport::frame::OutboundFrame;
use crate::transport::traits::{AdapterEvent, TransportError, WireAdapter};

/// How long `close` waits for the writer to flush a close frame
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type WriteResult = Result<(), TransportError>;

struct WriteRequest {
    text: String,
    done: oneshot::Sender<WriteResult>,
}

/// Tasks and queue of one open socket
struct SocketLink {
    writer_tx: mpsc::UnboundedSender<WriteRequest>,
    reader: JoinHandle<()>,
    writer: Option<JoinHandle<()>>,
}

impl Drop for SocketLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// WebSocket adapter
pub struct SocketAdapter {
    config: TransportConfig,
    link: Mutex<Option<SocketLink>>,
    open: Arc<AtomicBool>,
}

impl SocketAdapter {
    /// Create an adapter for the configured server; nothing is opened yet
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            link: Mutex::new(None),
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queue one frame for the writer task
    fn enqueue(&self, frame: &OutboundFrame) -> Result<oneshot::Receiver<WriteResult>, TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let text = frame.encode()?;

        let guard = self.link.lock();
        let link = guard.as_ref().ok_or(TransportError::NotConnected)?;
        let (done, done_rx) = oneshot::channel();
        link.writer_tx
            .send(WriteRequest { text, done })
            .map_err(|_| TransportError::NotConnected)?;
        Ok(done_rx)
    }
}

#[async_trait]
impl WireAdapter for SocketAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    async fn open(
        &self,
        session_id: &SessionId,
    ) -> Result<mpsc::Receiver<AdapterEvent>, TransportError> {
        if self.open.load(Ordering::SeqCst) {
            return Err(TransportError::InvalidState("Already open".to_string()));
        }

        let url = self.config.socket_url(session_id)?;
        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{url}: {e}")))?;
        let (mut sink, mut stream) = socket.split();

        let (event_tx, event_rx) = mpsc::channel(self.config.inbound_buffer);
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<WriteRequest>();

        self.open.store(true, Ordering::SeqCst);

        // Reader: stream -> events
        let open_read = Arc::clone(&self.open);
        let reader = tokio::spawn(async move {
            let (code, reason) = loop {
                let event = match stream.next().await {
                    Some(Ok(Message::Text(text))) => AdapterEvent::decode(&text),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => AdapterEvent::decode(&text),
                        Err(_) => AdapterEvent::Malformed("binary frame is not UTF-8".to_string()),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|cf| (Some(u16::from(cf.code)), cf.reason.to_string()))
                            .unwrap_or((None, "closed without status".to_string()));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break (None, e.to_string()),
                    None => break (None, "stream ended".to_string()),
                };
                if event_tx.send(event).await.is_err() {
                    tracing::debug!("Socket event receiver dropped");
                    break (None, "receiver dropped".to_string());
                }
            };

            open_read.store(false, Ordering::SeqCst);
            tracing::info!(?code, %reason, "Socket closed");
            let _ = event_tx.send(AdapterEvent::Closed { code, reason }).await;
        });

        // Writer: queue -> sink
        let open_write = Arc::clone(&self.open);
        let writer = tokio::spawn(async move {
            while let Some(request) = writer_rx.recv().await {
                let result = sink
                    .send(Message::Text(request.text))
                    .await
                    .map_err(|e| TransportError::SendFailed(e.to_string()));
                let failed = result.is_err();
                let _ = request.done.send(result);
                if failed {
                    tracing::warn!("Socket write failed, stopping writer");
                    open_write.store(false, Ordering::SeqCst);
                    return;
                }
            }

            // Queue closed by `close`
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        });

        *self.link.lock() = Some(SocketLink {
            writer_tx,
            reader,
            writer: Some(writer),
        });

        tracing::info!(session_id = %session_id, "Socket open");
        Ok(event_rx)
    }

    fn send(&self, frame: OutboundFrame) -> BoxFuture<'static, Result<(), TransportError>> {
        let committed = self.enqueue(&frame);
        Box::pin(async move {
            match committed {
                Ok(done) => done.await.unwrap_or(Err(TransportError::NotConnected)),
                Err(e) => Err(e),
            }
        })
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let link = self.link.lock().take();
        let Some(mut link) = link else {
            return;
        };

        let writer = link.writer.take();
        drop(link);
        if let Some(writer) = writer {
            if tokio::time::timeout(CLOSE_GRACE, writer).await.is_err() {
                tracing::debug!("Socket writer did not finish closing in time");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Drop for SocketAdapter {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            if let Some(writer) = &link.writer {
                writer.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::OutboundMessage;

    #[tokio::test]
    async fn test_open_no_server() {
        // Port 9 (discard) is almost never listening on loopback.
        let adapter = SocketAdapter::new(TransportConfig::new("http://127.0.0.1:9"));
        let result = adapter.open(&SessionId::from("abc123")).await;

        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert!(!adapter.is_open());
    }

    #[tokio::test]
    async fn test_send_not_connected() {
        let adapter = SocketAdapter::new(TransportConfig::default());
        let result = adapter
            .send(OutboundFrame::Message(OutboundMessage::user("hi")))
            .await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_close_when_never_opened() {
        let adapter = SocketAdapter::new(TransportConfig::default());
        adapter.close().await;
        adapter.close().await;
        assert!(!adapter.is_open());
        assert_eq!(adapter.kind(), TransportKind::Socket);
    }
}
