//! One-to-many reload signal relay.
//!
//! The watcher publishes into a [`Relay`]; every open watch connection holds a
//! [`Subscription`] that yields the next published signal exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

/// Error returned by [`Subscription::recv`] when the relay closed before a
/// signal arrived.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("reload relay closed")]
pub struct RelayClosed;

/// Registry state guarded by the relay mutex.
#[derive(Default)]
struct Registry {
    listeners: HashMap<u64, oneshot::Sender<()>>,
    next_id: u64,
    closed: bool,
}

/// Broadcast relay for zero-payload reload signals.
///
/// Cloning is cheap and yields a handle to the same relay.
///
/// # Example
///
/// ```
/// # async fn example() {
/// use devreload::Relay;
///
/// let relay = Relay::new();
/// let mut subscription = relay.subscribe();
///
/// relay.publish();
/// assert!(subscription.recv().await.is_ok());
/// # }
/// ```
#[derive(Clone, Default)]
pub struct Relay {
    registry: Arc<Mutex<Registry>>,
}

impl Relay {
    /// Create an open relay with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for the next published signal.
    ///
    /// Once the relay is closed this returns a subscription that is already
    /// closed.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = oneshot::channel();
        let mut registry = self.lock();

        if registry.closed {
            // Dropping the sender leaves `rx` closed.
            return Subscription {
                id: None,
                rx,
                consumed: false,
                registry: Arc::clone(&self.registry),
            };
        }

        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.insert(id, tx);

        Subscription {
            id: Some(id),
            rx,
            consumed: false,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Deliver a signal to every registered subscription.
    ///
    /// Never blocks. With no listeners, or after [`close`](Self::close), this
    /// is a no-op.
    pub fn publish(&self) {
        let listeners = std::mem::take(&mut self.lock().listeners);

        for tx in listeners.into_values() {
            // The receiver may be mid-drop; nothing to deliver to then.
            let _ = tx.send(());
        }
    }

    /// Close the relay.
    ///
    /// Outstanding subscriptions observe [`RelayClosed`], and later
    /// subscriptions are closed from the start.
    pub fn close(&self) {
        let mut registry = self.lock();
        registry.closed = true;
        registry.listeners.clear();
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of subscriptions waiting for the next signal.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Single-use handle to the next reload signal.
///
/// Dropping the subscription unregisters it from the relay.
pub struct Subscription {
    id: Option<u64>,
    rx: oneshot::Receiver<()>,
    consumed: bool,
    registry: Arc<Mutex<Registry>>,
}

impl Subscription {
    /// Wait for the next signal.
    ///
    /// Returns [`RelayClosed`] if the relay was closed first. Once this has
    /// returned, later calls return [`RelayClosed`] as well.
    pub async fn recv(&mut self) -> Result<(), RelayClosed> {
        if self.consumed {
            return Err(RelayClosed);
        }
        let result = (&mut self.rx).await.map_err(|_| RelayClosed);
        self.consumed = true;
        result
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry.listeners.remove(&id);
        }
    }
}
