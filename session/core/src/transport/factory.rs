//! Transport Factory
//!
//! Creates adapter instances by kind. The selector asks the factory for a
//! fresh adapter on every probe, so a failed adapter is never reused.
//! Tests substitute their own factory to script open outcomes.

use std::sync::Arc;

use super::{
    config::{TransportConfig, TransportKind},
    event_stream::StreamAdapter,
    traits::{TransportError, WireAdapter},
    websocket::SocketAdapter,
};

/// Source of fresh adapters
pub trait AdapterFactory: Send + Sync {
    /// Create an unopened adapter of the given kind
    fn create(&self, kind: TransportKind) -> Arc<dyn WireAdapter>;
}

/// Create an adapter of the given kind
///
/// # Example
///
/// ```ignore
/// use chat_session_core::transport::{create_adapter, TransportConfig, TransportKind};
///
/// let config = TransportConfig::new("http://localhost:8000");
/// let adapter = create_adapter(TransportKind::Socket, &config, &reqwest::Client::new());
/// let events = adapter.open(&session_id).await?;
/// ```
pub fn create_adapter(
    kind: TransportKind,
    config: &TransportConfig,
    http_client: &reqwest::Client,
) -> Arc<dyn WireAdapter> {
    match kind {
        TransportKind::Socket => Arc::new(SocketAdapter::new(config.clone())),
        TransportKind::Stream => Arc::new(StreamAdapter::new(config.clone(), http_client.clone())),
    }
}

/// Build the HTTP client shared by the event-stream adapter and session calls
///
/// Only the connect phase is bounded here; the event stream is long-lived,
/// so per-request timeouts are set on the calls that need one.
pub fn build_http_client(config: &TransportConfig) -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .connect_timeout(config.open_timeout())
        .build()
        .map_err(|e| TransportError::InvalidState(format!("Failed to create HTTP client: {e}")))
}

/// Factory producing real socket and event-stream adapters
#[derive(Clone)]
pub struct DefaultAdapterFactory {
    config: TransportConfig,
    http_client: reqwest::Client,
}

impl DefaultAdapterFactory {
    /// Create a factory with its own HTTP client
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let http_client = build_http_client(&config)?;
        Ok(Self::with_client(config, http_client))
    }

    /// Create a factory sharing an existing HTTP client
    #[must_use]
    pub fn with_client(config: TransportConfig, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
        }
    }

    /// Configuration adapters are created with
    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl AdapterFactory for DefaultAdapterFactory {
    fn create(&self, kind: TransportKind) -> Arc<dyn WireAdapter> {
        create_adapter(kind, &self.config, &self.http_client)
    }
}
