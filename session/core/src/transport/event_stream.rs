//! Event-Stream Transport
//!
//! Fallback transport: inbound frames arrive on a long-lived
//! `text/event-stream` response, outbound messages go out as one HTTP POST
//! each.
//!
//! The two directions are tracked independently. A failed or timed-out POST
//! surfaces as a send failure and leaves the inbound stream untouched. The
//! inbound stream ending clears only the inbound flag: the adapter stays
//! bound to its session and keeps accepting sends until `close`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::messages::SessionId;
use crate::transport::config::{TransportConfig, TransportKind};
use crate::transport::frame::OutboundFrame;
use crate::transport::sse::SseDecoder;
use crate::transport::traits::{AdapterEvent, TransportError, WireAdapter};

/// Event-stream plus HTTP-call adapter
pub struct StreamAdapter {
    config: TransportConfig,
    http_client: reqwest::Client,
    /// Session sends are bound to; set by `open`, cleared only by `close`
    bound: Mutex<Option<SessionId>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    /// Inbound stream state
    inbound_open: Arc<AtomicBool>,
}

impl StreamAdapter {
    /// Create an adapter that shares `http_client` with the rest of the client
    pub fn new(config: TransportConfig, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
            bound: Mutex::new(None),
            reader: Mutex::new(None),
            inbound_open: Arc::new(AtomicBool::new(false)),
        }
    }

    fn post_request(&self, frame: &OutboundFrame) -> Result<reqwest::RequestBuilder, TransportError> {
        let session_id = self
            .bound
            .lock()
            .clone()
            .ok_or(TransportError::NotConnected)?;
        let url = self.config.send_url(&session_id)?;
        let body = frame
            .call_body()
            .ok_or_else(|| TransportError::InvalidState("frame has no call body".to_string()))?;

        Ok(self
            .http_client
            .post(url)
            .timeout(self.config.send_timeout())
            .json(&body))
    }
}

#[async_trait]
impl WireAdapter for StreamAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    async fn open(
        &self,
        session_id: &SessionId,
    ) -> Result<mpsc::Receiver<AdapterEvent>, TransportError> {
        if self.bound.lock().is_some() {
            return Err(TransportError::InvalidState("Already open".to_string()));
        }

        let url = self.config.stream_url(session_id)?;
        let response = self
            .http_client
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(TransportError::ConnectionFailed(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        let (event_tx, event_rx) = mpsc::channel(self.config.inbound_buffer);
        let mut body = response.bytes_stream();
        let inbound_open = Arc::clone(&self.inbound_open);
        inbound_open.store(true, Ordering::SeqCst);
        *self.bound.lock() = Some(session_id.clone());

        let reader = tokio::spawn(async move {
            let mut decoder = SseDecoder::new();

            let reason = 'read: loop {
                match body.next().await {
                    Some(Ok(bytes)) => {
                        decoder.push(&bytes);
                        loop {
                            let event = match decoder.next_event() {
                                Ok(Some(sse)) => AdapterEvent::decode(&sse.data),
                                Ok(None) => break,
                                Err(e) => AdapterEvent::Malformed(e.to_string()),
                            };
                            if event_tx.send(event).await.is_err() {
                                tracing::debug!("Stream event receiver dropped");
                                break 'read "receiver dropped".to_string();
                            }
                        }
                    }
                    Some(Err(e)) => break e.to_string(),
                    None => break "stream ended".to_string(),
                }
            };

            inbound_open.store(false, Ordering::SeqCst);
            tracing::info!(%reason, "Event stream closed");
            let _ = event_tx
                .send(AdapterEvent::Closed { code: None, reason })
                .await;
        });

        if let Some(previous) = self.reader.lock().replace(reader) {
            previous.abort();
        }

        tracing::info!(session_id = %session_id, "Event stream open");
        Ok(event_rx)
    }

    fn send(&self, frame: OutboundFrame) -> BoxFuture<'static, Result<(), TransportError>> {
        // Latency probes ride on the socket only; the stream has its own heartbeat.
        if matches!(frame, OutboundFrame::Ping { .. }) {
            return Box::pin(futures::future::ready(Ok(())));
        }

        let request = self.post_request(&frame);
        Box::pin(async move {
            let response = request?.send().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::SendTimeout
                } else {
                    TransportError::SendFailed(e.to_string())
                }
            })?;

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                let body = response.text().await.unwrap_or_default();
                Err(TransportError::SendFailed(format!("{status}: {body}")))
            }
        })
    }

    async fn close(&self) {
        self.inbound_open.store(false, Ordering::SeqCst);
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        *self.bound.lock() = None;
    }

    fn is_open(&self) -> bool {
        self.inbound_open.load(Ordering::SeqCst)
    }
}

impl Drop for StreamAdapter {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}
