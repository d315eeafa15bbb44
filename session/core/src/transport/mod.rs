//! Transport Layer for Session Traffic
//!
//! Provides one capability set over two wire transports:
//! - `Socket`: persistent bidirectional WebSocket (primary)
//! - `Stream`: server-sent event stream for inbound frames plus one HTTP call
//!   per outbound message (fallback)
//!
//! # Design Philosophy
//!
//! The rest of the client only sees [`WireAdapter`] and [`Connection`]:
//! - Transport choice is made once per connection by the [`TransportSelector`]
//! - Frames mean the same thing whichever transport carried them
//! - Adapters are created fresh for every probe and never reused after close

pub mod config;
pub mod event_stream;
pub mod factory;
pub mod frame;
pub mod in_process;
pub mod selector;
pub mod sse;
pub mod traits;
pub mod websocket;

// Re-exports for convenience
pub use config::{TransportConfig, TransportKind};
pub use event_stream::StreamAdapter;
pub use factory::{build_http_client, create_adapter, AdapterFactory, DefaultAdapterFactory};
pub use frame::{InboundFrame, OutboundFrame};
pub use in_process::{InProcessAdapter, InProcessFactory, InProcessPeer, OpenBehavior};
pub use selector::{Connection, ConnectionPhase, TransportSelector};
pub use sse::{SseDecoder, SseEvent};
pub use traits::{AdapterEvent, TransportError, WireAdapter, NORMAL_CLOSE_CODE};
pub use websocket::SocketAdapter;
