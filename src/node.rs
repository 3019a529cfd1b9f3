//! Node lifecycle: value storage, refcounting, tombstoning, and the
//! per-node lock guarding the `prev`/`next` links.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;

/// The two link fields a node carries. Grouped under one lock because every
/// structural edit in the list's insert/erase protocols needs to read or
/// write both together, and the list's lock-ordering invariant requires
/// acquiring prev/current/next as a unit in list order.
pub(crate) struct Links<T> {
    pub prev: *mut Node<T>,
    pub next: *mut Node<T>,
}

/// One slot in the doubly linked list. `HEAD` and `TAIL` are nodes too
/// ("sentinels"), distinguished by their `sentinel` flag.
pub(crate) struct Node<T> {
    /// `None` only for sentinels, which carry no element.
    value: Option<T>,
    pub links: RwLock<Links<T>>,
    /// Adjacent-node back-pointers + live iterators + transient mutator
    /// captures, all counted uniformly.
    refs: AtomicUsize,
    /// Monotone false -> true. Once set, the node is no longer reachable
    /// from `HEAD` via `next` traversal, but its own `next` stays valid.
    tombstoned: AtomicBool,
    sentinel: bool,
}

// SAFETY: all interior mutability (links, refs, tombstoned) is synchronized
// via `RwLock`/atomics; `value` is written once at construction time, before
// the node is reachable from any other thread, and never mutated afterward.
unsafe impl<T: Send> Send for Node<T> {}
// `Node<T>: Sync` hands out `&T` (via `value()`) to whatever thread holds a
// shared reference to the node, and two threads can legitimately observe the
// same live node at once (e.g. both reading through `Iter::get`) -- sound
// only when `T: Sync`, the same bound `RwLock<T>: Sync` requires.
unsafe impl<T: Send + Sync> Sync for Node<T> {}

impl<T> Node<T> {
    pub fn new_value(value: T) -> Box<Node<T>> {
        Box::new(Node {
            value: Some(value),
            links: RwLock::new(Links {
                prev: std::ptr::null_mut(),
                next: std::ptr::null_mut(),
            }),
            refs: AtomicUsize::new(0),
            tombstoned: AtomicBool::new(false),
            sentinel: false,
        })
    }

    pub fn new_sentinel() -> Box<Node<T>> {
        Box::new(Node {
            value: None,
            links: RwLock::new(Links {
                prev: std::ptr::null_mut(),
                next: std::ptr::null_mut(),
            }),
            refs: AtomicUsize::new(0),
            tombstoned: AtomicBool::new(false),
            sentinel: true,
        })
    }

    pub fn is_tombstoned(&self) -> bool {
        self.tombstoned.load(Ordering::Acquire)
    }

    /// Sets the tombstone. Caller must hold an exclusive lock on this node.
    pub fn set_tombstoned(&self) {
        self.tombstoned.store(true, Ordering::Release);
    }

    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Raises `refs` by one. Used directly by `capture` and by iterator
    /// construction/clone, which bump the count without overwriting a link
    /// slot.
    pub fn bump_refs(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops `refs` by one, returning the new value. `0` means the caller is
    /// responsible for handing the node to purgatory (unless it is a
    /// sentinel, which purgatory never accepts.
    pub fn drop_ref(&self) -> usize {
        self.refs.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn value(&self) -> &T {
        self.value
            .as_ref()
            .expect("sentinels are never dereferenced")
    }
}

/// Stores `node` into `*slot` and increments `node`'s refcount. The
/// caller must already hold whatever locks make `*slot`'s
/// previous contents safe to simply overwrite -- the previous holder is
/// responsible for its own `release`.
///
/// # Safety
/// `node` must be a valid, live `Node<T>` for as long as `*slot` might still
/// reference it.
pub(crate) unsafe fn capture<T>(slot: &mut *mut Node<T>, node: *mut Node<T>) {
    (*node).bump_refs();
    *slot = node;
}
