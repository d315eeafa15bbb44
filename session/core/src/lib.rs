//! Chat Session Core - Real-Time Chat Transport and Session Client
//!
//! This crate connects a host application to a chat server over whichever
//! transport the network allows, keeps the connection alive, and turns the
//! server's frames into complete messages.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Host Application                          │
//! │      connect() / send() / disconnect()      ClientEvents ▲       │
//! └──────────────────────────┬───────────────────────────────┼───────┘
//!                            │                               │
//! ┌──────────────────────────┼───────────────────────────────┼───────┐
//! │                     SESSION CLIENT                       │       │
//! │  ┌─────────────┐  ┌──────┴──────┐  ┌────────────────┐  ┌─┴─────┐ │
//! │  │  Session    │  │  Transport  │  │  Reconnection  │  │Message│ │
//! │  │  API (HTTP) │  │  Selector   │  │  Scheduler     │  │Assem- │ │
//! │  └─────────────┘  └──────┬──────┘  └────────────────┘  │bler   │ │
//! │                          │                              └───────┘ │
//! │              ┌───────────┴───────────┐                            │
//! │              ▼                       ▼                            │
//! │      ┌──────────────┐      ┌───────────────────┐                  │
//! │      │Socket Adapter│      │Stream+Call Adapter│                  │
//! │      │ (WebSocket)  │      │ (SSE + HTTP POST) │                  │
//! │      └──────────────┘      └───────────────────┘                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`SessionClient`]: the façade the host talks to
//! - [`ClientEvent`]: everything the host observes
//! - [`TransportSelector`]: socket first, event stream on failure
//! - [`ReconnectScheduler`]: exponential backoff with a fixed budget
//! - [`MessageAssembler`]: streamed chunks into complete messages
//!
//! # Quick Start
//!
//! ```ignore
//! use chat_session_core::{load_config, SessionClient};
//! use tokio_stream::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let (client, mut events) = SessionClient::builder(config).build()?;
//!
//!     client.connect().await?;
//!     client.send("Hello!").await?;
//!
//!     while let Some(event) = events.next().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`transport`]: wire adapters, frame codec and transport selection
//! - [`reconnect`]: reconnection backoff state machine
//! - [`network`]: process-wide online/offline signal
//! - [`assembler`]: inbound frame reduction into messages
//! - [`latency`]: heartbeat configuration and the latency window
//! - [`session`]: session creation and history API
//! - [`client`]: the session client façade
//! - [`messages`]: data model and host events
//! - [`error`]: error taxonomy
//! - [`config`]: TOML configuration and environment overrides

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod assembler;
pub mod client;
pub mod config;
pub mod error;
pub mod latency;
pub mod messages;
pub mod network;
pub mod reconnect;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use assembler::MessageAssembler;
pub use client::{ClientEvents, SessionClient, SessionClientBuilder};
pub use error::SessionError;
pub use latency::{HeartbeatConfig, LatencyWindow};
pub use messages::{
    AssembledMessage, ClientEvent, ConnectionState, MessageId, MessageKind, MessageStatus,
    OutboundMessage, SessionId,
};
pub use network::{NetworkSignal, NetworkStatus, NetworkSubscription};
pub use reconnect::{
    ReconnectConfig, ReconnectDecision, ReconnectPhase, ReconnectScheduler, ReconnectState,
};
pub use session::{ApiError, HttpSessionApi, Session, SessionApi};
pub use transport::{
    AdapterEvent, AdapterFactory, Connection, InboundFrame, OutboundFrame, TransportConfig,
    TransportError, TransportKind, TransportSelector, WireAdapter,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ClientConfig, ClientLimits,
    ClientToml, ConfigError, ConfigSource,
};
