//! Hierarchical memory pool handle, modeling the APR pool the endpoint's
//! Java/APR ancestor threads per connection through `Acceptor` -> `Worker`
//! -> `Poller`.
//!
//! Rust has no need for an arena to reclaim per-connection allocations --
//! that's what `Drop` is for -- but the endpoint still needs the *shape* of
//! APR pools: a tree of lifetimes where destroying a parent recursively and
//! idempotently destroys every child, and where destroying a pool is a
//! distinct, observable event from merely dropping the last handle to it.
//! `Pool` gives `destroy()` that explicit, testable idempotence instead of
//! relying purely on when the last `Arc` happens to go away.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct PoolInner {
    id: u64,
    parent: Option<Weak<PoolInner>>,
    children: Mutex<Vec<Pool>>,
    destroyed: AtomicBool,
}

/// A handle into the pool tree. Clones share the same underlying node.
#[derive(Clone, Debug)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Creates a new root pool with no parent.
    pub fn new() -> Pool {
        Pool {
            inner: Arc::new(PoolInner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                parent: None,
                children: Mutex::new(Vec::new()),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a child pool whose lifetime is bounded by this one: destroying
    /// the parent destroys the child, but the child can also be destroyed
    /// independently (the common case: a per-connection pool destroyed when
    /// the connection closes, well before the endpoint itself stops). A
    /// child that destroys itself first unlinks from this pool's `children`
    /// list, so a long-lived server-socket pool doesn't accumulate a dead
    /// entry per connection it has ever accepted.
    pub fn create(&self) -> Pool {
        let child = Pool {
            inner: Arc::new(PoolInner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                parent: Some(Arc::downgrade(&self.inner)),
                children: Mutex::new(Vec::new()),
                destroyed: AtomicBool::new(false),
            }),
        };
        self.inner.children.lock().unwrap().push(child.clone());
        child
    }

    /// Whether `destroy` has already run on this handle.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Recursively destroys every child, then marks this pool destroyed.
    /// Safe to call more than once: the second and later calls are no-ops.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        let children = std::mem::take(&mut *self.inner.children.lock().unwrap());
        for child in children {
            child.destroy();
        }

        self.unlink_from_parent();
    }

    /// Removes this pool's entry from its parent's `children` list, if it
    /// has a live parent. Called once, from `destroy`, so a pool whose
    /// children are destroyed one at a time (the common per-connection
    /// case) doesn't leave the parent's list growing without bound.
    fn unlink_from_parent(&self) {
        if let Some(parent) = self.inner.parent.as_ref().and_then(Weak::upgrade) {
            parent
                .children
                .lock()
                .unwrap()
                .retain(|child| child.inner.id != self.inner.id);
        }
    }
}

impl Default for Pool {
    fn default() -> Pool {
        Pool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Pool;

    #[test]
    fn destroy_is_idempotent() {
        let pool = Pool::new();
        pool.destroy();
        pool.destroy();
        assert!(pool.is_destroyed());
    }

    #[test]
    fn destroy_recurses_into_children() {
        let root = Pool::new();
        let child = root.create();
        let grandchild = child.create();

        root.destroy();

        assert!(child.is_destroyed());
        assert!(grandchild.is_destroyed());
    }

    #[test]
    fn child_can_be_destroyed_independently() {
        let root = Pool::new();
        let child = root.create();

        child.destroy();

        assert!(child.is_destroyed());
        assert!(!root.is_destroyed());
    }

    /// A child pool destroyed on its own unlinks itself from the parent's
    /// `children` list instead of leaving a dead entry behind -- otherwise
    /// a long-lived server-socket pool would grow one entry per connection
    /// for the life of the endpoint.
    #[test]
    fn destroying_a_child_removes_it_from_the_parents_list() {
        let root = Pool::new();
        let first = root.create();
        let second = root.create();

        first.destroy();

        assert_eq!(root.inner.children.lock().unwrap().len(), 1);
        assert_eq!(root.inner.children.lock().unwrap()[0].inner.id, second.inner.id);
    }
}
