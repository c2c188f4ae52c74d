//! Connectivity change notification
//!
//! Collaborators (bridge handlers, UIs) register a [`ConnectivityListener`]
//! to mirror brain reachability without polling. Delivery is synchronous and
//! in registration order, on whichever task detected the transition.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

/// A change of the connectivity flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityEvent {
    pub old_value: bool,
    pub new_value: bool,
}

impl ConnectivityEvent {
    pub fn new(old_value: bool, new_value: bool) -> Self {
        Self {
            old_value,
            new_value,
        }
    }

    /// The brain became reachable
    pub fn is_connected(&self) -> bool {
        self.new_value
    }
}

/// Receives connectivity changes
pub trait ConnectivityListener: Send + Sync {
    fn connectivity_changed(&self, event: ConnectivityEvent);

    /// A listener reporting `true` can never receive again and is removed
    /// from its registry
    fn is_closed(&self) -> bool {
        false
    }
}

impl<F> ConnectivityListener for F
where
    F: Fn(ConnectivityEvent) + Send + Sync,
{
    fn connectivity_changed(&self, event: ConnectivityEvent) {
        self(event)
    }
}

/// Listener forwarding events into an unbounded channel
struct ChannelListener {
    sender: mpsc::UnboundedSender<ConnectivityEvent>,
}

impl ConnectivityListener for ChannelListener {
    fn connectivity_changed(&self, event: ConnectivityEvent) {
        // A dropped receiver just means nobody is watching anymore
        let _ = self.sender.send(event);
    }

    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Handle returned by [`ListenerRegistry::add`], used for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered set of connectivity listeners
///
/// Firing works on a snapshot of the registered listeners, so a listener may
/// add or remove listeners from inside its callback.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ConnectivityListener>)>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn ConnectivityListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Register a channel-backed listener and return its receiving end.
    ///
    /// The listener goes away once the receiver is dropped.
    pub fn subscribe(&self) -> (ListenerId, mpsc::UnboundedReceiver<ConnectivityEvent>) {
        self.prune_closed();
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.add(Arc::new(ChannelListener { sender }));
        (id, receiver)
    }

    /// Returns whether a listener was removed
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    pub fn fire(&self, event: ConnectivityEvent) {
        let snapshot: Vec<Arc<dyn ConnectivityListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        let mut any_closed = false;
        for listener in snapshot {
            if listener.is_closed() {
                any_closed = true;
                continue;
            }
            listener.connectivity_changed(event);
        }

        if any_closed {
            self.prune_closed();
        }
    }

    fn prune_closed(&self) {
        self.listeners.write().retain(|(_, listener)| !listener.is_closed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_fire_in_registration_order() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            registry.add(Arc::new(move |event: ConnectivityEvent| {
                seen.lock().push((name, event.new_value));
            }));
        }

        registry.fire(ConnectivityEvent::new(false, true));

        assert_eq!(
            *seen.lock(),
            vec![("first", true), ("second", true), ("third", true)]
        );
    }

    #[test]
    fn test_removed_listener_is_not_called() {
        let registry = ListenerRegistry::new();
        let calls = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&calls);
        let id = registry.add(Arc::new(move |_event: ConnectivityEvent| {
            *counter.lock() += 1;
        }));

        registry.fire(ConnectivityEvent::new(false, true));
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        registry.fire(ConnectivityEvent::new(true, false));

        assert_eq!(*calls.lock(), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_delivers_events_in_order() {
        let registry = ListenerRegistry::new();
        let (_id, mut rx) = registry.subscribe();

        registry.fire(ConnectivityEvent::new(false, true));
        registry.fire(ConnectivityEvent::new(true, false));

        assert_eq!(rx.recv().await, Some(ConnectivityEvent::new(false, true)));
        assert_eq!(rx.recv().await, Some(ConnectivityEvent::new(true, false)));
    }

    #[test]
    fn test_fire_drops_listener_with_dropped_receiver() {
        let registry = ListenerRegistry::new();
        let (_id, rx) = registry.subscribe();
        let (_kept_id, mut kept) = registry.subscribe();
        drop(rx);

        registry.fire(ConnectivityEvent::new(false, true));

        assert_eq!(registry.len(), 1);
        assert_eq!(kept.try_recv().ok(), Some(ConnectivityEvent::new(false, true)));
    }

    #[test]
    fn test_repeated_subscribe_does_not_accumulate() {
        let registry = ListenerRegistry::new();
        registry.add(Arc::new(|_event: ConnectivityEvent| {}));

        for _ in 0..1000 {
            let (_id, rx) = registry.subscribe();
            drop(rx);
        }

        // The closure listener plus the most recent, now closed, channel
        assert!(registry.len() <= 2);
        registry.fire(ConnectivityEvent::new(false, true));
        assert_eq!(registry.len(), 1);
    }
}
