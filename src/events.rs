//! Listener registry handing out [`ListenerId`] handles.
//!
//! Many listeners can be registered; each registration returns a handle that
//! is later passed back to [`IndexedEvents::remove_listener`].

use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct IndexedEvents<F: ?Sized> {
    next_id: u64,
    listeners: Vec<(ListenerId, Arc<F>)>,
}

impl<F: ?Sized> IndexedEvents<F> {
    pub fn new() -> Self {
        IndexedEvents {
            next_id: 0,
            listeners: Vec::new(),
        }
    }

    pub fn add_listener(&mut self, listener: Arc<F>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Returns false if the handle was unknown or already removed.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Snapshot in registration order. Callers invoke listeners on the
    /// snapshot so a listener may add or remove listeners while running.
    pub fn listeners(&self) -> Vec<Arc<F>> {
        self.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}

impl<F: ?Sized> Default for IndexedEvents<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Counter = dyn Fn(usize) + Send + Sync;

    #[test]
    fn test_add_emit_remove() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut events: IndexedEvents<Counter> = IndexedEvents::new();

        let h1 = Arc::clone(&hits);
        let first = events.add_listener(Arc::new(move |n: usize| {
            h1.fetch_add(n, Ordering::SeqCst);
        }));
        let h2 = Arc::clone(&hits);
        let second = events.add_listener(Arc::new(move |n: usize| {
            h2.fetch_add(n * 10, Ordering::SeqCst);
        }));
        assert_ne!(first, second);

        for l in events.listeners() {
            l(1);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 11);

        assert!(events.remove_listener(first));
        assert!(!events.remove_listener(first));
        for l in events.listeners() {
            l(1);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 21);
        assert_eq!(events.listeners().len(), 1);
        assert!(events.remove_listener(second));
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut events: IndexedEvents<Counter> = IndexedEvents::default();
        let a = events.add_listener(Arc::new(|_: usize| {}));
        events.remove_listener(a);
        let b = events.add_listener(Arc::new(|_: usize| {}));
        assert_ne!(a, b);
        events.clear();
        assert!(events.listeners().is_empty());
        assert!(!events.remove_listener(b));
    }
}
