//! Round-robin selection over a fixed set of same-kind stage instances
//! (`pollerThreadCount` Pollers, `sendfileThreadCount` Sendfiles).
//!
//! Grounded on spec.md §9's explicit guidance: "Round-robin selection of a
//! Poller/Sendfile (`roundRobin = (roundRobin+1) % n`) may race benignly;
//! atomic fetch-and-increment with modulo is appropriate."

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct RoundRobin<T> {
    items: Vec<Arc<T>>,
    next: AtomicUsize,
}

impl<T> RoundRobin<T> {
    /// Panics if `items` is empty -- callers always build a fleet with at
    /// least one instance (`pollerThreadCount`/`sendfileThreadCount` are
    /// clamped to `max(1)` before this is constructed).
    pub fn new(items: Vec<Arc<T>>) -> RoundRobin<T> {
        assert!(!items.is_empty(), "fleet must have at least one instance");
        RoundRobin {
            items,
            next: AtomicUsize::new(0),
        }
    }

    pub fn next(&self) -> Arc<T> {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.items.len();
        self.items[i].clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}
