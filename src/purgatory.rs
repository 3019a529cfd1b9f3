//! The intrusive, lock-free stack of doomed nodes awaiting reclamation.
//!
//! A Treiber-style CAS-loop intrusive push builds the chain (push races a
//! `compare_exchange` against the current head), specialized here to hold
//! raw [`crate::node::Node`] pointers instead of a generic payload.
//!
//! Pushes race each other (any mutator's `release` can push), but the gate
//! serializes them against the cleaner: every push happens while
//! the caller holds the gate shared, and the cleaner only reads or rewrites
//! the head pointer while holding the gate exclusively. That split is what
//! lets the cleaner walk and relink the chain below a snapshot with plain
//! loads/stores instead of further CAS loops.
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::node::Node;

/// One entry in the purgatory stack, referencing a single doomed node.
pub(crate) struct PurgeEntry<T> {
    pub body: *mut Node<T>,
    pub next: *mut PurgeEntry<T>,
}

/// The purgatory stack itself: just the atomic head pointer.
pub(crate) struct Purgatory<T> {
    head: AtomicPtr<PurgeEntry<T>>,
}

// SAFETY: entries and the nodes they reference are only ever accessed through
// the synchronized push/walk protocol described above.
unsafe impl<T: Send> Send for Purgatory<T> {}
unsafe impl<T: Send> Sync for Purgatory<T> {}

impl<T> Purgatory<T> {
    pub fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Treiber push of a new entry wrapping `node`. Caller must hold the
    /// gate shared for the duration of this call.
    pub fn push(&self, node: *mut Node<T>) {
        let entry = Box::into_raw(Box::new(PurgeEntry {
            body: node,
            next: ptr::null_mut(),
        }));
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // SAFETY: `entry` was just allocated by this call and is not yet
            // visible to any other thread.
            unsafe {
                (*entry).next = head;
            }
            match self
                .head
                .compare_exchange_weak(head, entry, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    /// Reads the current head. Caller must hold the gate exclusively.
    pub fn head(&self) -> *mut PurgeEntry<T> {
        self.head.load(Ordering::Acquire)
    }

    /// Overwrites the head. Caller must hold the gate exclusively; no push
    /// can be racing this store under that discipline.
    pub fn set_head(&self, new_head: *mut PurgeEntry<T>) {
        self.head.store(new_head, Ordering::Release);
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl<T> Drop for Purgatory<T> {
    fn drop(&mut self) {
        // The cleaner thread has already been joined and has fully drained
        // purgatory by the time a `List` drops its `Purgatory`, so nothing
        // should remain. We still walk and free defensively rather than
        // leak if that invariant were ever violated.
        let mut cur = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        while !cur.is_null() {
            // SAFETY: single-owner teardown; no concurrent access is
            // possible once `Purgatory::drop` has started.
            let entry = unsafe { Box::from_raw(cur) };
            cur = entry.next;
        }
    }
}
