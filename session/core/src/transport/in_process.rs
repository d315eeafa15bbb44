//! In-Process Transport
//!
//! Channel-backed adapters for embedding and tests. An [`InProcessFactory`]
//! hands out adapters whose open outcome is scripted per transport kind;
//! every created adapter has an [`InProcessPeer`] that plays the server side:
//! it pushes inbound frames, closes the channel, and records what the client
//! sent.
//!
//! # Usage
//!
//! ```ignore
//! let factory = Arc::new(InProcessFactory::new());
//! factory.set_default(TransportKind::Socket, OpenBehavior::Hang);
//!
//! let (client, mut events) = SessionClient::builder(config)
//!     .adapter_factory(factory.clone())
//!     .build()?;
//! client.connect().await?;
//!
//! let peer = factory.open_peer().unwrap();
//! peer.push(InboundFrame::Heartbeat { echo: None });
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::messages::SessionId;

use super::config::TransportKind;
use super::factory::AdapterFactory;
use super::frame::{InboundFrame, OutboundFrame};
use super::traits::{AdapterEvent, TransportError, WireAdapter};

/// How an in-process adapter's `open` resolves
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpenBehavior {
    /// Open successfully after a delay
    Accept {
        /// Delay before the open completes
        after: Duration,
    },
    /// Fail after a delay
    Refuse {
        /// Delay before the failure
        after: Duration,
        /// Failure reason
        reason: String,
    },
    /// Never complete
    Hang,
}

impl OpenBehavior {
    /// Open immediately
    #[must_use]
    pub fn accept() -> Self {
        Self::Accept {
            after: Duration::ZERO,
        }
    }

    /// Fail immediately
    pub fn refuse(reason: impl Into<String>) -> Self {
        Self::Refuse {
            after: Duration::ZERO,
            reason: reason.into(),
        }
    }
}

/// State shared between one adapter and its peer
struct Link {
    kind: TransportKind,
    session_id: Mutex<Option<SessionId>>,
    open: AtomicBool,
    event_tx: Mutex<Option<mpsc::Sender<AdapterEvent>>>,
    sent: Mutex<Vec<OutboundFrame>>,
    send_calls: AtomicUsize,
    close_calls: AtomicUsize,
    fail_sends: AtomicBool,
}

impl Link {
    fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            session_id: Mutex::new(None),
            open: AtomicBool::new(false),
            event_tx: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            send_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
        }
    }

    fn emit(&self, event: AdapterEvent) -> bool {
        match self.event_tx.lock().as_ref() {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }
}

/// Channel-backed adapter created by [`InProcessFactory`]
pub struct InProcessAdapter {
    behavior: OpenBehavior,
    link: Arc<Link>,
    capacity: usize,
}

#[async_trait]
impl WireAdapter for InProcessAdapter {
    fn kind(&self) -> TransportKind {
        self.link.kind
    }

    async fn open(
        &self,
        session_id: &SessionId,
    ) -> Result<mpsc::Receiver<AdapterEvent>, TransportError> {
        match &self.behavior {
            OpenBehavior::Accept { after } => {
                tokio::time::sleep(*after).await;
                let (tx, rx) = mpsc::channel(self.capacity);
                *self.link.event_tx.lock() = Some(tx);
                *self.link.session_id.lock() = Some(session_id.clone());
                self.link.open.store(true, Ordering::SeqCst);
                Ok(rx)
            }
            OpenBehavior::Refuse { after, reason } => {
                tokio::time::sleep(*after).await;
                Err(TransportError::ConnectionFailed(reason.clone()))
            }
            OpenBehavior::Hang => futures::future::pending().await,
        }
    }

    fn send(&self, frame: OutboundFrame) -> BoxFuture<'static, Result<(), TransportError>> {
        self.link.send_calls.fetch_add(1, Ordering::SeqCst);
        let result = if !self.link.open.load(Ordering::SeqCst) {
            Err(TransportError::NotConnected)
        } else if self.link.fail_sends.load(Ordering::SeqCst) {
            Err(TransportError::SendFailed("peer rejected send".to_string()))
        } else {
            self.link.sent.lock().push(frame);
            Ok(())
        };
        Box::pin(futures::future::ready(result))
    }

    async fn close(&self) {
        self.link.close_calls.fetch_add(1, Ordering::SeqCst);
        self.link.open.store(false, Ordering::SeqCst);
        self.link.event_tx.lock().take();
    }

    fn is_open(&self) -> bool {
        self.link.open.load(Ordering::SeqCst)
    }
}

/// Server side of one in-process adapter
#[derive(Clone)]
pub struct InProcessPeer {
    link: Arc<Link>,
}

impl InProcessPeer {
    /// Transport kind of the adapter
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.link.kind
    }

    /// Session the adapter was opened for
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.link.session_id.lock().clone()
    }

    /// Whether the client side is open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.link.open.load(Ordering::SeqCst)
    }

    /// Deliver an inbound frame; false if the channel is not open
    pub fn push(&self, frame: InboundFrame) -> bool {
        self.link.emit(AdapterEvent::Frame(frame))
    }

    /// Deliver raw text through the frame codec
    pub fn push_text(&self, text: &str) -> bool {
        self.link.emit(AdapterEvent::decode(text))
    }

    /// Close the channel from the server side
    pub fn close(&self, code: Option<u16>, reason: impl Into<String>) {
        self.link.open.store(false, Ordering::SeqCst);
        self.link.emit(AdapterEvent::Closed {
            code,
            reason: reason.into(),
        });
        self.link.event_tx.lock().take();
    }

    /// Make subsequent sends fail
    pub fn fail_sends(&self, fail: bool) {
        self.link.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Frames the client sent successfully
    #[must_use]
    pub fn sent(&self) -> Vec<OutboundFrame> {
        self.link.sent.lock().clone()
    }

    /// Number of `send` calls, successful or not
    #[must_use]
    pub fn send_calls(&self) -> usize {
        self.link.send_calls.load(Ordering::SeqCst)
    }

    /// Number of `close` calls made by the client
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.link.close_calls.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Script {
    queued: HashMap<TransportKind, VecDeque<OpenBehavior>>,
    defaults: HashMap<TransportKind, OpenBehavior>,
    created: Vec<InProcessPeer>,
}

/// Factory of scripted in-process adapters
pub struct InProcessFactory {
    script: Mutex<Script>,
    capacity: usize,
}

impl Default for InProcessFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessFactory {
    /// Create a factory whose adapters all open immediately
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create with custom inbound channel capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            script: Mutex::new(Script::default()),
            capacity,
        }
    }

    /// Behavior for every adapter of `kind` without a queued behavior
    pub fn set_default(&self, kind: TransportKind, behavior: OpenBehavior) {
        self.script.lock().defaults.insert(kind, behavior);
    }

    /// Behavior for the next adapter of `kind` only
    pub fn push_behavior(&self, kind: TransportKind, behavior: OpenBehavior) {
        self.script
            .lock()
            .queued
            .entry(kind)
            .or_default()
            .push_back(behavior);
    }

    /// Peers of every adapter created so far, in creation order
    #[must_use]
    pub fn peers(&self) -> Vec<InProcessPeer> {
        self.script.lock().created.clone()
    }

    /// Kinds of every adapter created so far, in creation order
    #[must_use]
    pub fn created_kinds(&self) -> Vec<TransportKind> {
        self.script.lock().created.iter().map(InProcessPeer::kind).collect()
    }

    /// The most recently created adapter that is currently open
    #[must_use]
    pub fn open_peer(&self) -> Option<InProcessPeer> {
        self.script
            .lock()
            .created
            .iter()
            .rev()
            .find(|peer| peer.is_open())
            .cloned()
    }

    /// Total `send` calls across every adapter
    #[must_use]
    pub fn total_send_calls(&self) -> usize {
        self.script
            .lock()
            .created
            .iter()
            .map(InProcessPeer::send_calls)
            .sum()
    }
}

impl AdapterFactory for InProcessFactory {
    fn create(&self, kind: TransportKind) -> Arc<dyn WireAdapter> {
        let mut script = self.script.lock();
        let queued = script.queued.get_mut(&kind).and_then(VecDeque::pop_front);
        let behavior = queued
            .or_else(|| script.defaults.get(&kind).cloned())
            .unwrap_or_else(OpenBehavior::accept);

        let link = Arc::new(Link::new(kind));
        script.created.push(InProcessPeer {
            link: Arc::clone(&link),
        });

        Arc::new(InProcessAdapter {
            behavior,
            link,
            capacity: self.capacity,
        })
    }
}
