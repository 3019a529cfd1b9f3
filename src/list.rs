//! The concurrent ordered doubly linked list.
//!
//! Every mutator acquires node locks in the canonical `prev -> current ->
//! next` order to avoid deadlock, validates the local
//! topology it captured before committing a change, and retries if a
//! concurrent mutation invalidated that snapshot. Nodes are never freed
//! synchronously: once unreachable and unreferenced they are handed to
//! [`crate::purgatory`], and a dedicated cleaner thread frees them only once
//! the gate has established that no mutator could still be holding a raw
//! pointer to them (the grace-period discipline).
//!
//! `List<T>` owns its `ListInner<T>` through a `Box` rather than an `Arc`.
//! The cleaner thread is handed a raw pointer to that stable heap address
//! instead of a shared owning handle -- an `Arc` here would create a
//! reference cycle between the thread and the `Drop` impl that has to join
//! it. Iterators borrow `&'a List<T>` instead, so the borrow checker
//! enforces, statically, that an iterator cannot outlive the list it was
//! created from.
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::gate::Gate;
use crate::node::{self, Node};
use crate::purgatory::{PurgeEntry, Purgatory};

struct ListInner<T> {
    head: *mut Node<T>,
    tail: *mut Node<T>,
    size: AtomicUsize,
    gate: Gate,
    purgatory: Purgatory<T>,
    shutdown: AtomicBool,
    cleaner: Mutex<Option<JoinHandle<()>>>,
    cleaner_interval: Duration,
}

// SAFETY: every field with interior state (`head`/`tail` node graphs,
// `purgatory`) is synchronized internally; `ListInner` is only ever reached
// through `&ListInner` (shared references), never mutated through `&mut`.
unsafe impl<T: Send> Send for ListInner<T> {}
// See `Node<T>`'s `Sync` impl: this propagates the same `T: Sync` requirement
// up through the list, since `List::begin`/`Iter::get` hand out `&T`.
unsafe impl<T: Send + Sync> Sync for ListInner<T> {}

impl<T> ListInner<T> {
    fn is_sentinel(&self, n: *mut Node<T>) -> bool {
        ptr::eq(n, self.head) || ptr::eq(n, self.tail)
    }

    /// Drops one reference on `n`. If that was the last reference and `n`
    /// is not a sentinel, hands it to purgatory.
    fn release(&self, n: *mut Node<T>) {
        let remaining = unsafe { (*n).drop_ref() };
        if remaining == 0 && !self.is_sentinel(n) {
            let _gate = self.gate.acquire_shared();
            self.purgatory.push(n);
        }
    }

    /// One pass of the two-pass mark/detach/sweep/free cleaner protocol.
    /// Returns `(freed, discarded)` purely for logging.
    fn sweep_once(&self) -> (usize, usize) {
        let boundary = {
            let _gate = self.gate.acquire_exclusive();
            self.purgatory.head()
        };
        if boundary.is_null() {
            return (0, 0);
        }

        // Pass 1: walk everything at or below the snapshot, discarding
        // entries whose node is still referenced or already tombstoned by
        // some earlier round, and tombstoning + relinking the rest into an
        // independent "survivors" chain.
        let mut survivors_head: *mut PurgeEntry<T> = ptr::null_mut();
        let mut survivors_tail: *mut PurgeEntry<T> = ptr::null_mut();
        let mut discarded = 0usize;
        let mut cursor = boundary;
        while !cursor.is_null() {
            let entry = cursor;
            // SAFETY: `entry` has not been freed -- it is either `boundary`
            // itself, read fresh above, or was reached via a `next` link we
            // have not yet overwritten this pass.
            let next = unsafe { (*entry).next };
            cursor = next;
            let body = unsafe { (*entry).body };
            let discard = unsafe { (*body).refs() > 0 || (*body).is_tombstoned() };
            if discard {
                discarded += 1;
                // SAFETY: purgatory entries are single-consumer -- only this
                // cleaner thread ever walks or frees them.
                drop(unsafe { Box::from_raw(entry) });
            } else {
                unsafe {
                    (*body).set_tombstoned();
                    (*entry).next = ptr::null_mut();
                }
                if survivors_tail.is_null() {
                    survivors_head = entry;
                } else {
                    unsafe { (*survivors_tail).next = entry };
                }
                survivors_tail = entry;
            }
        }

        // Step 3: if nothing was pushed while pass 1 ran, the entire stack
        // was just the boundary segment -- detach it outright. Otherwise
        // note the segment above the boundary for pass 2.
        let segment_above = {
            let _gate = self.gate.acquire_exclusive();
            let current = self.purgatory.head();
            if ptr::eq(current, boundary) {
                self.purgatory.set_head(ptr::null_mut());
                None
            } else {
                Some(current)
            }
        };

        // Pass 2: sweep the segment pushed during pass 1. `boundary` is
        // only ever compared by address below, never dereferenced -- it may
        // already have been freed above if it was itself discarded.
        if let Some(seg_head) = segment_above {
            let mut prev: *mut PurgeEntry<T> = ptr::null_mut();
            let mut new_seg_head = seg_head;
            let mut cursor = seg_head;
            while !ptr::eq(cursor, boundary) {
                let entry = cursor;
                // SAFETY: entries above `boundary` were pushed after the
                // snapshot and pass 1 never touched them.
                let next = unsafe { (*entry).next };
                let body = unsafe { (*entry).body };
                if unsafe { (*body).is_tombstoned() } {
                    if prev.is_null() {
                        new_seg_head = next;
                    } else {
                        unsafe { (*prev).next = next };
                    }
                    drop(unsafe { Box::from_raw(entry) });
                } else {
                    prev = entry;
                }
                cursor = next;
            }

            let replacement = if ptr::eq(new_seg_head, boundary) {
                ptr::null_mut()
            } else {
                if !prev.is_null() {
                    unsafe { (*prev).next = ptr::null_mut() };
                }
                new_seg_head
            };

            let _gate = self.gate.acquire_exclusive();
            self.splice_segment(seg_head, replacement);
        }

        // Step 5: free the detached survivors. Each had `refs() == 0` and
        // was already tombstoned by the time this round's exclusive-gate
        // snapshot was taken -- no mutator that started before then can
        // still hold a pointer to it.
        let mut freed = 0usize;
        let mut cursor = survivors_head;
        while !cursor.is_null() {
            let entry = cursor;
            // SAFETY: `free_entry` takes ownership of `entry`; read `next`
            // before that happens.
            let next = unsafe { (*entry).next };
            cursor = next;
            self.free_entry(entry);
            freed += 1;
        }
        (freed, discarded)
    }

    /// Repoints whatever currently points at `anchor` (the live purgatory
    /// head, or some entry's `next` field) so it points at `replacement`
    /// instead. Caller must hold the gate exclusively, which rules out any
    /// concurrent `push` moving the head out from under this walk.
    fn splice_segment(&self, anchor: *mut PurgeEntry<T>, replacement: *mut PurgeEntry<T>) {
        let head = self.purgatory.head();
        if ptr::eq(head, anchor) {
            self.purgatory.set_head(replacement);
            return;
        }
        let mut walk = head;
        loop {
            // SAFETY: only `push` writes a fresh entry's `next`, and only
            // this cleaner ever rewrites an existing entry's `next`; under
            // the gate held exclusively neither can be racing this read.
            let next = unsafe { (*walk).next };
            if ptr::eq(next, anchor) {
                unsafe { (*walk).next = replacement };
                return;
            }
            walk = next;
        }
    }

    /// Deallocates a detached purge entry: releases the node's own `prev`/
    /// `next` back-references (which may themselves enqueue further purge
    /// entries) and frees the node and the entry.
    fn free_entry(&self, entry: *mut PurgeEntry<T>) {
        // SAFETY: `entry` is part of the chain handed exclusively to this
        // function by `sweep_once`; nothing else can reach it.
        let entry = unsafe { Box::from_raw(entry) };
        let body = entry.body;
        let (prev, next) = {
            let links = unsafe { (*body).links.read() };
            (links.prev, links.next)
        };
        if !prev.is_null() {
            self.release(prev);
        }
        if !next.is_null() {
            self.release(next);
        }
        // SAFETY: `body`'s own refcount reached 0 at mark time and the
        // grace period has since elapsed; nothing else can reach it.
        drop(unsafe { Box::from_raw(body) });
    }
}

/// Wraps a raw `ListInner` pointer so it can be handed to the cleaner
/// thread. `ListInner<T>: Send` whenever `T: Send`, so this is sound; the
/// newtype exists only because raw pointers aren't `Send` by default.
struct CleanerHandle<T>(*const ListInner<T>);
unsafe impl<T: Send> Send for CleanerHandle<T> {}

fn cleaner_loop<T: Send>(inner: CleanerHandle<T>, interval: Duration) {
    let inner: &ListInner<T> = unsafe { &*inner.0 };
    loop {
        let (freed, discarded) = inner.sweep_once();
        if freed > 0 || discarded > 0 {
            trace!(freed, discarded, "purgatory sweep");
        }
        let shutting_down = inner.shutdown.load(Ordering::Acquire);
        if shutting_down && inner.purgatory.is_empty() {
            debug!("cleaner thread exiting");
            return;
        }
        if !shutting_down {
            std::thread::sleep(interval);
        }
    }
}

/// A concurrent ordered doubly linked list with fine-grained per-node
/// locking and deferred reclamation.
///
/// Construct with [`List::new`] or [`List::from_values`]; mutate through
/// shared references (`&self`) -- every method synchronizes internally, so
/// no external `Mutex<List<T>>` wrapper is needed for safe concurrent use.
pub struct List<T> {
    inner: Box<ListInner<T>>,
}

impl<T: Send + Sync> List<T> {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let head = Box::into_raw(Node::new_sentinel());
        let tail = Box::into_raw(Node::new_sentinel());
        unsafe {
            let mut head_links = (*head).links.write();
            let mut tail_links = (*tail).links.write();
            node::capture(&mut head_links.next, tail);
            node::capture(&mut tail_links.prev, head);
        }

        let mut inner = Box::new(ListInner {
            head,
            tail,
            size: AtomicUsize::new(0),
            gate: Gate::new(config.gate),
            purgatory: Purgatory::new(),
            shutdown: AtomicBool::new(false),
            cleaner: Mutex::new(None),
            cleaner_interval: config.cleaner_interval,
        });

        let handle_ptr = CleanerHandle(&*inner as *const ListInner<T>);
        let interval = inner.cleaner_interval;
        let handle = std::thread::Builder::new()
            .name("purgatory-cleaner".into())
            .spawn(move || cleaner_loop(handle_ptr, interval))
            .expect("failed to spawn purgatory cleaner thread");
        *inner.cleaner.get_mut() = Some(handle);

        List { inner }
    }

    /// Builds a list from an initial collection, appended in iteration
    /// order via repeated `push_back`.
    pub fn from_values(values: impl IntoIterator<Item = T>) -> Self {
        let list = Self::new();
        for value in values {
            list.push_back(value);
        }
        list
    }

    pub fn size(&self) -> usize {
        self.inner.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// An iterator positioned at the first element, or at `end()` if the
    /// list is currently empty.
    pub fn begin(&self) -> Iter<'_, T> {
        let links = unsafe { (*self.inner.head).links.read() };
        let first = links.next;
        // Bump while still holding `head`'s lock: a concurrent erase of
        // `first` must take `head` (its predecessor) exclusively, so this
        // guard rules out `first` being unlinked and freed before its
        // refcount reflects this iterator's hold.
        unsafe { (*first).bump_refs() };
        drop(links);
        Iter::adopt(self, first)
    }

    /// An iterator positioned at the `TAIL` sentinel. Never dereferenced;
    /// valid only as a stepping/comparison endpoint.
    pub fn end(&self) -> Iter<'_, T> {
        Iter::new(self, self.inner.tail)
    }

    pub fn push_front(&self, value: T) {
        let mut it = Iter::new(self, self.inner.head);
        let _ = self.insert(&mut it, value);
    }

    pub fn push_back(&self, value: T) {
        let links = unsafe { (*self.inner.tail).links.read() };
        let prev = links.prev;
        unsafe { (*prev).bump_refs() };
        drop(links);
        let mut it = Iter::adopt(self, prev);
        let _ = self.insert(&mut it, value);
    }

    /// Inserts `value` immediately after `it`'s current position, advances
    /// `it` to the new node, and returns a second iterator to it.
    pub fn insert<'a>(&'a self, it: &mut Iter<'a, T>, value: T) -> Result<Iter<'a, T>> {
        loop {
            let p = it.node;
            if ptr::eq(p, self.inner.tail) {
                return Err(Error::OutOfRange);
            }
            if unsafe { (*p).is_tombstoned() } {
                return Ok(self.end());
            }

            let mut p_links = unsafe { (*p).links.write() };
            let n = p_links.next;
            let mut n_links = unsafe { (*n).links.write() };

            if !ptr::eq(n_links.prev, p) {
                drop(n_links);
                drop(p_links);
                continue;
            }

            let x = Box::into_raw(Node::new_value(value));
            let mut x_links = unsafe { (*x).links.write() };

            unsafe {
                node::capture(&mut p_links.next, x);
                node::capture(&mut x_links.prev, p);
                node::capture(&mut n_links.prev, x);
                node::capture(&mut x_links.next, n);
            }
            // Structural back-pointers that pointed at `p`/`n` before this
            // edit now point at `x` instead; release the stale references.
            self.inner.release(p);
            self.inner.release(n);

            self.inner.size.fetch_add(1, Ordering::AcqRel);

            unsafe {
                node::capture(&mut it.node, x);
            }
            // `it`'s own prior hold on `p` is now stale too.
            self.inner.release(p);

            drop(x_links);
            drop(n_links);
            drop(p_links);

            trace!(size = self.size(), "insert");
            return Ok(it.clone());
        }
    }

    /// Erases the node `it` points at, advances `it` to its former
    /// successor, and returns a copy of the advanced iterator. If another
    /// thread already erased this node first, `it` just advances to the
    /// successor that erase observed -- racing erasers on the same node
    /// converge on the same result rather than one of them failing.
    pub fn erase<'a>(&'a self, it: &mut Iter<'a, T>) -> Result<Iter<'a, T>> {
        loop {
            match self.erase_attempt(it.node, false) {
                EraseOutcome::Done(new_it) => {
                    // `erase_attempt` already released `it`'s old hold on
                    // the erased node (mirrors `insert`'s "release P via
                    // iterator's own prior reference"); transfer ownership
                    // of `new_it`'s hold into `it` without re-releasing.
                    it.node = new_it.node;
                    std::mem::forget(new_it);
                    return Ok(it.clone());
                }
                EraseOutcome::Retry => continue,
                EraseOutcome::RetryFromStart => unreachable!("erase() never sets is_popped"),
                EraseOutcome::OutOfRange => return Err(Error::OutOfRange),
            }
        }
    }

    pub fn pop_front(&self) -> Result<()> {
        let links = unsafe { (*self.inner.head).links.read() };
        let mut node = links.next;
        unsafe { (*node).bump_refs() };
        drop(links);
        loop {
            match self.erase_attempt(node, true) {
                EraseOutcome::Done(new_it) => {
                    drop(new_it);
                    return Ok(());
                }
                EraseOutcome::Retry => continue,
                EraseOutcome::RetryFromStart => {
                    let links = unsafe { (*self.inner.head).links.read() };
                    node = links.next;
                    unsafe { (*node).bump_refs() };
                    drop(links);
                    continue;
                }
                EraseOutcome::OutOfRange => {
                    self.inner.release(node);
                    return Err(Error::OutOfRange);
                }
            }
        }
    }

    pub fn pop_back(&self) -> Result<()> {
        let links = unsafe { (*self.inner.tail).links.read() };
        let mut node = links.prev;
        unsafe { (*node).bump_refs() };
        drop(links);
        loop {
            match self.erase_attempt(node, true) {
                EraseOutcome::Done(new_it) => {
                    drop(new_it);
                    return Ok(());
                }
                EraseOutcome::Retry => continue,
                EraseOutcome::RetryFromStart => {
                    let links = unsafe { (*self.inner.tail).links.read() };
                    node = links.prev;
                    unsafe { (*node).bump_refs() };
                    drop(links);
                    continue;
                }
                EraseOutcome::OutOfRange => {
                    self.inner.release(node);
                    return Err(Error::OutOfRange);
                }
            }
        }
    }

    /// A single attempt at erasing `node`. Consumes one reference the
    /// caller holds on `node` (the "position ref") on every outcome except
    /// [`EraseOutcome::Retry`] and [`EraseOutcome::OutOfRange`], where the
    /// caller's hold is left intact for reuse.
    fn erase_attempt<'a>(&'a self, node: *mut Node<T>, is_popped: bool) -> EraseOutcome<'a, T> {
        if ptr::eq(node, self.inner.head) || ptr::eq(node, self.inner.tail) {
            return EraseOutcome::OutOfRange;
        }

        // Keep `node`'s own read lock held across the bump: a concurrent
        // erase of `prev` must take `node` (its successor) exclusively, so
        // this guard rules out `prev` being unlinked and freed before its
        // refcount reflects the bumps below. Same argument for `next` via
        // whatever node comes after it.
        let links = unsafe { (*node).links.read() };
        let (prev, next) = (links.prev, links.next);
        unsafe {
            (*prev).bump_refs();
            (*next).bump_refs();
        }
        drop(links);

        let mut prev_links = unsafe { (*prev).links.write() };
        let _node_links = unsafe { (*node).links.read() };
        let mut next_links = unsafe { (*next).links.write() };

        if unsafe { (*node).is_tombstoned() } {
            self.inner.release(prev);
            self.inner.release(next);
            return if is_popped {
                self.inner.release(node);
                EraseOutcome::RetryFromStart
            } else {
                let it = Iter::new(self, next);
                self.inner.release(node);
                EraseOutcome::Done(it)
            };
        }

        let valid = ptr::eq(prev_links.next, node) && ptr::eq(next_links.prev, node);
        if !valid {
            self.inner.release(prev);
            self.inner.release(next);
            return EraseOutcome::Retry;
        }

        unsafe {
            node::capture(&mut prev_links.next, next);
            node::capture(&mut next_links.prev, prev);
            (*node).set_tombstoned();
        }
        // Two releases for the structural back-pointers this erase just
        // overwrote, one more for the caller's own position ref on `node`.
        self.inner.release(node);
        self.inner.release(node);
        self.inner.release(node);

        self.inner.size.fetch_sub(1, Ordering::AcqRel);

        let it = Iter::new(self, next);

        self.inner.release(prev);
        self.inner.release(next);

        trace!(size = self.size(), "erase");
        EraseOutcome::Done(it)
    }
}

impl<T: Send + Sync> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

enum EraseOutcome<'a, T> {
    Done(Iter<'a, T>),
    RetryFromStart,
    Retry,
    OutOfRange,
}

impl<T> Drop for List<T> {
    fn drop(&mut self) {
        // Release the spine of structural references while the cleaner is
        // still running, so everything that becomes unreferenced here is
        // drained normally rather than leaked.
        unsafe {
            let mut node = (*self.inner.head).links.read().next;
            while !ptr::eq(node, self.inner.tail) {
                let next = (*node).links.read().next;
                self.inner.release(node);
                node = next;
            }
        }

        self.inner.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.inner.cleaner.get_mut().take() {
            let _ = handle.join();
        }

        debug_assert!(self.inner.purgatory.is_empty());

        unsafe {
            drop(Box::from_raw(self.inner.head));
            drop(Box::from_raw(self.inner.tail));
        }
    }
}

/// A bidirectional cursor into a [`List`], tied to the list's lifetime.
///
/// Stepping (`advance`/`retreat`) acquires the target node's own lock in
/// shared mode rather than the list-wide gate -- plain reads of
/// `next`/`prev` would otherwise race a concurrent insert/erase splicing in
/// a new neighbor.
pub struct Iter<'a, T> {
    node: *mut Node<T>,
    list: &'a List<T>,
}

impl<'a, T> Iter<'a, T> {
    fn new(list: &'a List<T>, node: *mut Node<T>) -> Self {
        unsafe { (*node).bump_refs() };
        Iter { node, list }
    }

    /// Wraps `node` without bumping its refcount -- for callers that already
    /// bumped it themselves while still holding the lock that handed them
    /// `node` in the first place.
    fn adopt(list: &'a List<T>, node: *mut Node<T>) -> Self {
        Iter { node, list }
    }

    /// Dereferences the current position. Panics if called on `end()` or a
    /// tombstoned node with no value -- both are sentinel-only states.
    pub fn get(&self) -> &T {
        unsafe { (*self.node).value() }
    }

    pub fn is_tombstoned(&self) -> bool {
        unsafe { (*self.node).is_tombstoned() }
    }

    pub fn is_end(&self) -> bool {
        ptr::eq(self.node, self.list.inner.tail)
    }

    /// Steps to the successor (C++'s `operator++`).
    pub fn advance(&mut self) {
        let old = self.node;
        // Keep `old`'s own read lock held across the bump, same as
        // `List::erase_attempt` -- a concurrent erase of `next` must take
        // `old` (its predecessor) exclusively first.
        let links = unsafe { (*old).links.read() };
        let next = links.next;
        unsafe { node::capture(&mut self.node, next) };
        drop(links);
        self.list.inner.release(old);
    }

    /// Steps to the predecessor (C++'s `operator--`).
    pub fn retreat(&mut self) {
        let old = self.node;
        let links = unsafe { (*old).links.read() };
        let prev = links.prev;
        unsafe { node::capture(&mut self.node, prev) };
        drop(links);
        self.list.inner.release(old);
    }
}

impl<'a, T> std::ops::Deref for Iter<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.get()
    }
}

impl<'a, T> Clone for Iter<'a, T> {
    fn clone(&self) -> Self {
        unsafe { (*self.node).bump_refs() };
        Iter {
            node: self.node,
            list: self.list,
        }
    }
}

impl<'a, T> PartialEq for Iter<'a, T> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.node, other.node)
    }
}
impl<'a, T> Eq for Iter<'a, T> {}

impl<'a, T> Drop for Iter<'a, T> {
    fn drop(&mut self) {
        self.list.inner.release(self.node);
    }
}
