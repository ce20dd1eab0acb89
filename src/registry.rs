//! Thread-safe listener registry with per-listener fault isolation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Registry of observer handles for one listener trait.
///
/// Membership is idempotent by handle identity (`Arc::ptr_eq`): adding
/// the same handle twice is a no-op. Broadcast iterates a point-in-time
/// snapshot, so listeners may register or unregister themselves during a
/// broadcast without affecting the current one, and without holding the
/// lock across listener code.
pub struct ListenerRegistry<L: ?Sized> {
    listeners: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> ListenerRegistry<L> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Add a listener. Returns false if the handle was already
    /// registered.
    pub fn add(&self, listener: Arc<L>) -> bool {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Remove a listener. Returns false if the handle was not
    /// registered.
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of the listener set.
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Invoke `notify` for every listener in the current snapshot.
    ///
    /// A panicking listener is logged and skipped; it does not prevent
    /// subsequent listeners from being invoked.
    pub fn broadcast<F>(&self, notify: F)
    where
        F: Fn(&L),
    {
        for listener in self.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| notify(&listener))).is_err() {
                warn!("listener panicked during broadcast, continuing with remaining listeners");
            }
        }
    }
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait TestListener: Send + Sync {
        fn poke(&self);
    }

    struct Counting {
        count: AtomicUsize,
    }

    impl Counting {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                count: AtomicUsize::new(0),
            })
        }

        fn count(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }
    }

    impl TestListener for Counting {
        fn poke(&self) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicking;

    impl TestListener for Panicking {
        fn poke(&self) {
            panic!("listener fault");
        }
    }

    #[test]
    fn test_add_is_idempotent_by_handle() {
        let registry: ListenerRegistry<dyn TestListener> = ListenerRegistry::new();
        let listener = Counting::new();

        assert!(registry.add(listener.clone()));
        assert!(!registry.add(listener.clone()));
        assert_eq!(registry.len(), 1);

        // A distinct handle with the same behavior is a distinct member.
        assert!(registry.add(Counting::new()));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove() {
        let registry: ListenerRegistry<dyn TestListener> = ListenerRegistry::new();
        let listener: Arc<dyn TestListener> = Counting::new();

        registry.add(listener.clone());
        assert!(registry.remove(&listener));
        assert!(!registry.remove(&listener));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_broadcast_reaches_all() {
        let registry: ListenerRegistry<dyn TestListener> = ListenerRegistry::new();
        let a = Counting::new();
        let b = Counting::new();
        registry.add(a.clone());
        registry.add(b.clone());

        registry.broadcast(|l| l.poke());
        assert_eq!(a.count(), 1);
        assert_eq!(b.count(), 1);
    }

    #[test]
    fn test_broadcast_isolates_panicking_listener() {
        let registry: ListenerRegistry<dyn TestListener> = ListenerRegistry::new();
        let first = Counting::new();
        let third = Counting::new();
        registry.add(first.clone());
        registry.add(Arc::new(Panicking));
        registry.add(third.clone());

        registry.broadcast(|l| l.poke());
        assert_eq!(first.count(), 1);
        assert_eq!(third.count(), 1);
    }

    #[test]
    fn test_listener_may_unregister_during_broadcast() {
        struct SelfRemoving {
            registry: Arc<ListenerRegistry<dyn TestListener>>,
            me: Mutex<Option<Arc<dyn TestListener>>>,
        }

        impl TestListener for SelfRemoving {
            fn poke(&self) {
                if let Some(me) = self.me.lock().unwrap().take() {
                    self.registry.remove(&me);
                }
            }
        }

        let registry: Arc<ListenerRegistry<dyn TestListener>> =
            Arc::new(ListenerRegistry::new());
        let tail = Counting::new();

        let removing = Arc::new(SelfRemoving {
            registry: registry.clone(),
            me: Mutex::new(None),
        });
        let handle: Arc<dyn TestListener> = removing.clone();
        *removing.me.lock().unwrap() = Some(handle.clone());

        registry.add(handle);
        registry.add(tail.clone());

        registry.broadcast(|l| l.poke());
        // The snapshot still delivered to the listener after the one
        // that removed itself.
        assert_eq!(tail.count(), 1);
        assert_eq!(registry.len(), 1);
    }
}
