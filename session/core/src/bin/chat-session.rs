//! Chat Session Client
//!
//! Line-oriented terminal client: connects to a chat server, sends every
//! line typed on stdin as a user message and prints what comes back.
//!
//! # Usage
//!
//! ```bash
//! # Connect to the configured server
//! chat-session
//!
//! # Connect to a specific server
//! chat-session https://chat.example.com
//!
//! # Force the event-stream transport, with verbose logging
//! CHAT_SESSION_TRANSPORT=stream RUST_LOG=debug chat-session
//! ```
//!
//! # Environment Variables
//!
//! - `CHAT_SESSION_CONFIG`: Path to a TOML config file
//!   (default: `$XDG_CONFIG_HOME/chat-session/client.toml`)
//! - `CHAT_SESSION_URL`: Server base URL
//! - `CHAT_SESSION_TRANSPORT`: `auto` (socket first) or `stream`
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! # Signals
//!
//! - SIGINT: Disconnect and exit

use std::io::Write;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use chat_session_core::{
    default_config_path, load_config_from_path, ClientEvent, ConnectionState, MessageStatus,
    SessionClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chat_session=info".parse()?)
                .add_directive("chat_session_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let config_path = std::env::var("CHAT_SESSION_CONFIG")
        .ok()
        .map(PathBuf::from)
        .or_else(default_config_path);
    let mut config = load_config_from_path(config_path)?;
    if let Some(base_url) = std::env::args().nth(1) {
        config = config.with_cli_base_url(base_url);
        config.validate()?;
    }

    info!(
        server = %config.transport.base_url,
        source = %config.source(),
        "Starting chat session"
    );

    let (client, mut events) = SessionClient::builder(config).build()?;

    let transport = client.connect().await.map_err(|e| {
        error!(error = %e, "Failed to connect");
        anyhow::anyhow!("Could not reach the chat server: {e}")
    })?;
    info!(transport = %transport, "Session ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        if let Err(e) = client.send(line).await {
                            warn!(error = %e, "Message not sent");
                            println!("! {e}");
                        }
                    }
                    Ok(None) => {
                        info!("Input closed");
                        stdin_open = false;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to read input");
                        stdin_open = false;
                    }
                }
            }
            event = events.next() => {
                let Some(event) = event else {
                    break;
                };
                if !render(&event) {
                    break;
                }
            }
            _ = signal::ctrl_c() => {
                info!("Received SIGINT, disconnecting");
                break;
            }
        }
    }

    client.disconnect().await;
    info!("Chat session ended");
    Ok(())
}

/// Print one event; false when the session can no longer continue
fn render(event: &ClientEvent) -> bool {
    match event {
        ClientEvent::History { messages } => {
            for message in messages {
                println!("[{}] {}", message.kind.as_str(), message.content);
            }
        }
        ClientEvent::Partial { message } => {
            // Redrawn in place until the message completes.
            print!("\r[{}] {}", message.kind.as_str(), message.content);
            let _ = std::io::stdout().flush();
        }
        ClientEvent::Message { message } => {
            if message.status == MessageStatus::Error {
                println!("\r! [{}] {} (incomplete)", message.kind.as_str(), message.content);
            } else {
                println!("\r[{}] {}", message.kind.as_str(), message.content);
            }
        }
        ClientEvent::SendFailed { content, error, .. } => {
            println!("! not delivered: {content:?} ({error})");
        }
        ClientEvent::ProtocolConflict { error, .. } => println!("! {error}"),
        ClientEvent::ServerError { message } => println!("! server: {message}"),
        ClientEvent::StateChanged(state) => match state {
            ConnectionState::Reconnecting {
                attempt,
                max_attempts,
            } => println!("* reconnecting ({attempt}/{max_attempts})"),
            ConnectionState::Offline => println!("* offline"),
            ConnectionState::Connected(transport) => println!("* connected via {transport}"),
            _ => {}
        },
        ClientEvent::ReconnectExhausted { attempts } => {
            println!("! connection lost after {attempts} reconnection attempts");
            return false;
        }
        _ => {}
    }
    true
}
