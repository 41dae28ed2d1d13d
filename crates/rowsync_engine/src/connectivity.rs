//! Connectivity signal consumed by the engine.
//!
//! Probing is someone else's job; this is only the seam through which the
//! probe publishes a boolean and through which the engine observes
//! offline-to-online transitions.

use tokio::sync::watch;

/// A shared online/offline signal.
///
/// Cloning the handle shares the underlying channel, so the probe, the
/// table sync engine, and the change queue all observe the same state.
#[derive(Debug, Clone)]
pub struct ConnectivityHandle {
    sender: watch::Sender<bool>,
    receiver: watch::Receiver<bool>,
}

impl ConnectivityHandle {
    /// Creates a handle with the given initial state.
    pub fn new(online: bool) -> Self {
        let (sender, receiver) = watch::channel(online);
        Self { sender, receiver }
    }

    /// Creates a handle that starts online.
    pub fn online() -> Self {
        Self::new(true)
    }

    /// Creates a handle that starts offline.
    pub fn offline() -> Self {
        Self::new(false)
    }

    /// Returns the current state.
    pub fn is_online(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Publishes a new state. No-op senders (same value) still wake
    /// subscribers, so the probe should only call this on real changes.
    pub fn set_online(&self, online: bool) {
        // Send only fails with no receivers; we always hold one.
        let _ = self.sender.send(online);
    }

    /// Waits until the signal transitions from offline to online.
    ///
    /// Returns immediately only after observing an actual edge, not while
    /// the state is already online.
    pub async fn wait_for_online_edge(&self) {
        let mut receiver = self.receiver.clone();
        let mut was_online = *receiver.borrow();
        while receiver.changed().await.is_ok() {
            let online = *receiver.borrow();
            if online && !was_online {
                return;
            }
            was_online = online;
        }
    }
}

impl Default for ConnectivityHandle {
    fn default() -> Self {
        Self::online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn state_is_shared_across_clones() {
        let signal = ConnectivityHandle::offline();
        let observer = signal.clone();
        assert!(!observer.is_online());

        signal.set_online(true);
        assert!(observer.is_online());
    }

    #[tokio::test]
    async fn edge_waits_for_actual_transition() {
        let signal = ConnectivityHandle::offline();
        let waiter = signal.clone();
        let edge = tokio::spawn(async move { waiter.wait_for_online_edge().await });

        // Still offline: publishing offline again is not an edge.
        signal.set_online(false);
        tokio::task::yield_now().await;
        assert!(!edge.is_finished());

        signal.set_online(true);
        edge.await.unwrap();
    }
}
