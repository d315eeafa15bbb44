//! Transport Configuration
//!
//! Configuration types for selecting transports, plus derivation of every
//! endpoint URL from the base URL and a session id.
//!
//! # URL Shapes
//!
//! | Endpoint          | URL                                   |
//! |-------------------|---------------------------------------|
//! | Socket            | `ws[s]://host/ws/{session_id}`        |
//! | Event stream      | `http[s]://host/api/stream/{session_id}` |
//! | Outbound send     | `http[s]://host/api/chat?session_id=` |
//! | Session creation  | `http[s]://host/api/sessions`         |
//! | History           | `http[s]://host/api/sessions/{id}/history` |
//!
//! The socket scheme mirrors the base scheme: `https` becomes `wss`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::messages::SessionId;
use crate::transport::traits::TransportError;

/// Default server base URL
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Default open timeout per transport, in milliseconds
pub const DEFAULT_OPEN_TIMEOUT_MS: u64 = 10_000;

/// Default timeout for one outbound call on the event-stream transport
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 30_000;

/// Concrete transport kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Persistent bidirectional WebSocket
    Socket,
    /// Server-sent event stream plus one HTTP call per send
    Stream,
}

impl TransportKind {
    /// Selection order: primary first
    pub const PROBE_ORDER: [TransportKind; 2] = [TransportKind::Socket, TransportKind::Stream];

    /// Short name used in logs and events
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Socket => "socket",
            Self::Stream => "stream",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Server base URL (`http` or `https`)
    pub base_url: String,

    /// How long each transport may take to open, in milliseconds
    pub open_timeout_ms: u64,

    /// Timeout for one outbound call on the event-stream transport
    pub send_timeout_ms: u64,

    /// Whether to probe the socket transport at all
    ///
    /// When false the selector goes straight to the event stream.
    pub socket_enabled: bool,

    /// Capacity of each adapter's inbound event channel
    pub inbound_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            open_timeout_ms: DEFAULT_OPEN_TIMEOUT_MS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            socket_enabled: true,
            inbound_buffer: 256,
        }
    }
}

impl TransportConfig {
    /// Create a configuration for the given server
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Open timeout as a `Duration`
    #[must_use]
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    /// Send timeout as a `Duration`
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Transports to probe, in order
    #[must_use]
    pub fn probe_order(&self) -> Vec<TransportKind> {
        TransportKind::PROBE_ORDER
            .into_iter()
            .filter(|kind| self.socket_enabled || *kind != TransportKind::Socket)
            .collect()
    }

    /// Parse and check the base URL
    pub fn base(&self) -> Result<Url, TransportError> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            TransportError::InvalidState(format!("Invalid base URL {:?}: {e}", self.base_url))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(TransportError::InvalidState(format!(
                "Unsupported base URL scheme: {other}"
            ))),
        }
    }

    /// Base URL with `suffix` appended to its path
    fn endpoint(&self, suffix: &str) -> Result<Url, TransportError> {
        let mut url = self.base()?;
        let path = format!("{}/{}", url.path().trim_end_matches('/'), suffix);
        url.set_path(&path);
        Ok(url)
    }

    /// WebSocket URL for a session
    pub fn socket_url(&self, session_id: &SessionId) -> Result<Url, TransportError> {
        let mut url = self.endpoint(&format!("ws/{session_id}"))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|()| {
            TransportError::InvalidState(format!("Cannot derive {scheme} URL from {url}"))
        })?;
        Ok(url)
    }

    /// Event-stream URL for a session
    pub fn stream_url(&self, session_id: &SessionId) -> Result<Url, TransportError> {
        self.endpoint(&format!("api/stream/{session_id}"))
    }

    /// Outbound send URL for a session
    pub fn send_url(&self, session_id: &SessionId) -> Result<Url, TransportError> {
        let mut url = self.endpoint("api/chat")?;
        url.query_pairs_mut()
            .append_pair("session_id", session_id.as_str());
        Ok(url)
    }

    /// Session-creation URL
    pub fn sessions_url(&self) -> Result<Url, TransportError> {
        self.endpoint("api/sessions")
    }

    /// History URL for a session
    pub fn history_url(&self, session_id: &SessionId) -> Result<Url, TransportError> {
        self.endpoint(&format!("api/sessions/{session_id}/history"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> SessionId {
        SessionId::from("abc123")
    }

    #[test]
    fn test_transport_config_default() {
        let config = TransportConfig::default();
        assert_eq!(config.open_timeout(), Duration::from_secs(10));
        assert_eq!(config.send_timeout(), Duration::from_secs(30));
        assert_eq!(
            config.probe_order(),
            vec![TransportKind::Socket, TransportKind::Stream]
        );
    }

    #[test]
    fn test_probe_order_without_socket() {
        let config = TransportConfig {
            socket_enabled: false,
            ..Default::default()
        };
        assert_eq!(config.probe_order(), vec![TransportKind::Stream]);
    }

    #[test]
    fn test_socket_url_mirrors_scheme() {
        let plain = TransportConfig::new("http://localhost:8000");
        assert_eq!(
            plain.socket_url(&id()).unwrap().as_str(),
            "ws://localhost:8000/ws/abc123"
        );

        let secure = TransportConfig::new("https://chat.example.com/");
        assert_eq!(
            secure.socket_url(&id()).unwrap().as_str(),
            "wss://chat.example.com/ws/abc123"
        );
    }

    #[test]
    fn test_urls_keep_base_path() {
        let config = TransportConfig::new("https://example.com/app/");
        assert_eq!(
            config.stream_url(&id()).unwrap().as_str(),
            "https://example.com/app/api/stream/abc123"
        );
        assert_eq!(
            config.history_url(&id()).unwrap().as_str(),
            "https://example.com/app/api/sessions/abc123/history"
        );
        assert_eq!(
            config.send_url(&id()).unwrap().as_str(),
            "https://example.com/app/api/chat?session_id=abc123"
        );
    }

    #[test]
    fn test_rejects_non_http_base() {
        let config = TransportConfig::new("ftp://example.com");
        assert!(matches!(
            config.sessions_url(),
            Err(TransportError::InvalidState(_))
        ));

        let config = TransportConfig::new("not a url");
        assert!(config.base().is_err());
    }

    #[test]
    fn test_transport_kind_display() {
        assert_eq!(TransportKind::Socket.to_string(), "socket");
        assert_eq!(TransportKind::Stream.to_string(), "stream");
    }
}
