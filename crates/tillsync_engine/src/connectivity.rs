//! Network reachability signal.

use tokio::sync::watch;

/// Reports whether the remote authority is reachable.
///
/// The engine never checks the network itself. Hosts wire their platform's
/// reachability API into an implementation of this trait.
pub trait Connectivity: Send + Sync {
    /// Returns the current reachability.
    fn is_reachable(&self) -> bool;

    /// Subscribes to reachability changes.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// A connectivity signal driven by explicit calls.
#[derive(Debug)]
pub struct ManualConnectivity {
    tx: watch::Sender<bool>,
}

impl ManualConnectivity {
    /// Creates a signal with an initial state.
    pub fn new(reachable: bool) -> Self {
        let (tx, _rx) = watch::channel(reachable);
        Self { tx }
    }

    /// Creates a signal that starts reachable.
    pub fn online() -> Self {
        Self::new(true)
    }

    /// Creates a signal that starts unreachable.
    pub fn offline() -> Self {
        Self::new(false)
    }

    /// Updates reachability; subscribers are notified only on change.
    pub fn set_reachable(&self, reachable: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != reachable;
            *current = reachable;
            changed
        });
    }
}

impl Connectivity for ManualConnectivity {
    fn is_reachable(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
