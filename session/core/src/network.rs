//! Network Availability Signal
//!
//! Process-wide online/offline state, set by the host (from OS
//! notifications, a connectivity probe, or a UI toggle) and observed by
//! every session client.
//!
//! A client reads the current status when it is built, keeps a
//! [`NetworkSubscription`] while it is connected, and drops it on
//! `disconnect`. Tests inject their own [`NetworkSignal`] instead of the
//! global one.

use std::sync::{Arc, OnceLock};

use tokio::sync::watch;

/// Network availability
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkStatus {
    /// Network reachable
    Online,
    /// Network unreachable
    Offline,
}

/// Shared, observable network status
#[derive(Clone, Debug)]
pub struct NetworkSignal {
    tx: Arc<watch::Sender<NetworkStatus>>,
}

impl Default for NetworkSignal {
    fn default() -> Self {
        Self::new(NetworkStatus::Online)
    }
}

impl NetworkSignal {
    /// Create an independent signal
    #[must_use]
    pub fn new(initial: NetworkStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// The process-wide signal, starting online
    #[must_use]
    pub fn global() -> &'static NetworkSignal {
        static GLOBAL: OnceLock<NetworkSignal> = OnceLock::new();
        GLOBAL.get_or_init(NetworkSignal::default)
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> NetworkStatus {
        *self.tx.borrow()
    }

    /// Update the status; subscribers are woken only on a change
    pub fn set(&self, status: NetworkStatus) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            tracing::info!(?status, "Network status changed");
        }
    }

    /// Mark the network reachable
    pub fn set_online(&self) {
        self.set(NetworkStatus::Online);
    }

    /// Mark the network unreachable
    pub fn set_offline(&self) {
        self.set(NetworkStatus::Offline);
    }

    /// Start observing changes
    #[must_use]
    pub fn subscribe(&self) -> NetworkSubscription {
        let mut rx = self.tx.subscribe();
        rx.mark_unchanged();
        NetworkSubscription { rx }
    }
}

/// Live view of a [`NetworkSignal`]
#[derive(Debug)]
pub struct NetworkSubscription {
    rx: watch::Receiver<NetworkStatus>,
}

impl NetworkSubscription {
    /// Status at the time of the call
    #[must_use]
    pub fn current(&self) -> NetworkStatus {
        *self.rx.borrow()
    }

    /// Wait for the next change; `None` if the signal is gone
    pub async fn changed(&mut self) -> Option<NetworkStatus> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}
