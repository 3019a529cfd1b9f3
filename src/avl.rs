//! A concurrent ordered map backed by an AVL tree with coarse-grained
//! whole-tree locking.
//!
//! Deliberately simpler than [`crate::list`]'s per-node discipline: every
//! operation takes the tree's single `parking_lot::RwLock` shared or
//! exclusive, rather than locking individual nodes. The recursive
//! insert/remove/rebalance walk and the `deleted` tombstone flag follow
//! the usual shape for this kind of structure; what's worth calling out is
//! how an outstanding iterator survives a concurrent erase. A design that
//! hands an iterator a pointer to the physical node, falling back to a
//! from-root key search only once that node is marked deleted, gets an
//! `O(1)`-amortized successor lookup for live nodes but needs the node to
//! stay alive behind the iterator's back. [`Iter`] here never hands out a
//! node pointer at all -- it carries just the current key and re-derives
//! its neighbor by a fresh from-root search under the tree lock on every
//! step, which costs that fast path but means an iterator can never
//! outlive the tree node it once pointed at.
use std::cmp::Ordering as CmpOrdering;

use parking_lot::RwLock;

struct TreeNode<K, V> {
    key: K,
    value: V,
    deleted: bool,
    height: i32,
    left: Option<Box<TreeNode<K, V>>>,
    right: Option<Box<TreeNode<K, V>>>,
}

impl<K, V> TreeNode<K, V> {
    fn new(key: K, value: V) -> Box<Self> {
        Box::new(TreeNode {
            key,
            value,
            deleted: false,
            height: 1,
            left: None,
            right: None,
        })
    }
}

fn height<K, V>(n: &Option<Box<TreeNode<K, V>>>) -> i32 {
    n.as_ref().map_or(0, |n| n.height)
}

fn balance_factor<K, V>(n: &TreeNode<K, V>) -> i32 {
    height(&n.right) - height(&n.left)
}

fn fix_height<K, V>(n: &mut TreeNode<K, V>) {
    n.height = height(&n.left).max(height(&n.right)) + 1;
}

fn rotate_right<K, V>(mut n: Box<TreeNode<K, V>>) -> Box<TreeNode<K, V>> {
    let mut pivot = n.left.take().expect("rotate_right requires a left child");
    n.left = pivot.right.take();
    fix_height(&mut n);
    pivot.right = Some(n);
    fix_height(&mut pivot);
    pivot
}

fn rotate_left<K, V>(mut n: Box<TreeNode<K, V>>) -> Box<TreeNode<K, V>> {
    let mut pivot = n.right.take().expect("rotate_left requires a right child");
    n.right = pivot.left.take();
    fix_height(&mut n);
    pivot.left = Some(n);
    fix_height(&mut pivot);
    pivot
}

fn balance<K, V>(mut n: Box<TreeNode<K, V>>) -> Box<TreeNode<K, V>> {
    fix_height(&mut n);
    match balance_factor(&n) {
        2 => {
            if balance_factor(n.right.as_ref().unwrap()) < 0 {
                n.right = Some(rotate_right(n.right.take().unwrap()));
            }
            rotate_left(n)
        }
        -2 => {
            if balance_factor(n.left.as_ref().unwrap()) > 0 {
                n.left = Some(rotate_left(n.left.take().unwrap()));
            }
            rotate_right(n)
        }
        _ => n,
    }
}

fn insert<K: Ord, V>(
    n: Option<Box<TreeNode<K, V>>>,
    key: K,
    value: V,
) -> (Option<Box<TreeNode<K, V>>>, Option<V>) {
    match n {
        None => (Some(TreeNode::new(key, value)), None),
        Some(mut n) => match key.cmp(&n.key) {
            CmpOrdering::Less => {
                let (left, old) = insert(n.left.take(), key, value);
                n.left = left;
                (Some(balance(n)), old)
            }
            CmpOrdering::Greater => {
                let (right, old) = insert(n.right.take(), key, value);
                n.right = right;
                (Some(balance(n)), old)
            }
            CmpOrdering::Equal => {
                let old = std::mem::replace(&mut n.value, value);
                n.deleted = false;
                (Some(n), Some(old))
            }
        },
    }
}

fn find_min<K, V>(n: &TreeNode<K, V>) -> (&K, &V) {
    match &n.left {
        Some(left) => find_min(left),
        None => (&n.key, &n.value),
    }
}

fn remove_min<K, V>(n: Box<TreeNode<K, V>>) -> (Option<Box<TreeNode<K, V>>>, Box<TreeNode<K, V>>) {
    let mut n = n;
    match n.left.take() {
        None => (n.right.take(), n),
        Some(left) => {
            let (new_left, min) = remove_min(left);
            n.left = new_left;
            (Some(balance(n)), min)
        }
    }
}

fn remove<K: Ord, V>(
    n: Option<Box<TreeNode<K, V>>>,
    key: &K,
) -> (Option<Box<TreeNode<K, V>>>, Option<V>) {
    match n {
        None => (None, None),
        Some(mut n) => match key.cmp(&n.key) {
            CmpOrdering::Less => {
                let (left, removed) = remove(n.left.take(), key);
                n.left = left;
                (Some(balance(n)), removed)
            }
            CmpOrdering::Greater => {
                let (right, removed) = remove(n.right.take(), key);
                n.right = right;
                (Some(balance(n)), removed)
            }
            CmpOrdering::Equal => {
                n.deleted = true;
                let left = n.left.take();
                let right = n.right.take();
                let removed = Some(n.value);
                match right {
                    None => (left, removed),
                    Some(right) => {
                        let (new_right, mut min) = remove_min(right);
                        min.left = left;
                        min.right = new_right;
                        (Some(balance(min)), removed)
                    }
                }
            }
        },
    }
}

/// Finds the live node whose key equals `key`.
fn find<'a, K: Ord, V>(mut n: &'a Option<Box<TreeNode<K, V>>>, key: &K) -> Option<&'a TreeNode<K, V>> {
    while let Some(node) = n {
        match key.cmp(&node.key) {
            CmpOrdering::Less => n = &node.left,
            CmpOrdering::Greater => n = &node.right,
            CmpOrdering::Equal => return Some(node),
        }
    }
    None
}

/// Finds the smallest key strictly greater than `key` (in-order successor
/// by key, not by physical pointer).
fn successor_key<'a, K: Ord + Clone, V>(
    n: &'a Option<Box<TreeNode<K, V>>>,
    key: &K,
) -> Option<&'a K> {
    let mut cursor = n;
    let mut candidate: Option<&K> = None;
    while let Some(node) = cursor {
        if node.key > *key {
            candidate = Some(&node.key);
            cursor = &node.left;
        } else {
            cursor = &node.right;
        }
    }
    candidate
}

/// Finds the largest key strictly smaller than `key`.
fn predecessor_key<'a, K: Ord + Clone, V>(
    n: &'a Option<Box<TreeNode<K, V>>>,
    key: &K,
) -> Option<&'a K> {
    let mut cursor = n;
    let mut candidate: Option<&K> = None;
    while let Some(node) = cursor {
        if node.key < *key {
            candidate = Some(&node.key);
            cursor = &node.right;
        } else {
            cursor = &node.left;
        }
    }
    candidate
}

fn min_key<K, V>(n: &Option<Box<TreeNode<K, V>>>) -> Option<&K> {
    n.as_ref().map(|n| find_min(n).0)
}

fn in_order_collect<'a, K, V>(n: &'a Option<Box<TreeNode<K, V>>>, out: &mut Vec<(&'a K, &'a V)>) {
    if let Some(n) = n {
        in_order_collect(&n.left, out);
        if !n.deleted {
            out.push((&n.key, &n.value));
        }
        in_order_collect(&n.right, out);
    }
}

struct Tree<K, V> {
    root: Option<Box<TreeNode<K, V>>>,
    size: usize,
}

/// A concurrent ordered map with `insert`/`get`/`remove`/in-order `iter`.
pub struct Map<K, V> {
    inner: RwLock<Tree<K, V>>,
}

impl<K: Ord + Clone, V> Map<K, V> {
    pub fn new() -> Self {
        Map {
            inner: RwLock::new(Tree {
                root: None,
                size: 0,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts `key`/`value`, returning the previous value if the key was
    /// already present (whether or not it had been tombstoned by an earlier
    /// removal -- re-insertion always clears the tombstone).
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let mut guard = self.inner.write();
        let root = guard.root.take();
        let (root, old) = insert(root, key, value);
        guard.root = root;
        if old.is_none() {
            guard.size += 1;
        }
        old
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.write();
        let root = guard.root.take();
        let (root, removed) = remove(root, key);
        guard.root = root;
        if removed.is_some() {
            guard.size -= 1;
        }
        removed
    }

    /// Applies `f` to the value stored at `key`, if present, without
    /// cloning it out from behind the tree lock.
    pub fn view<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        let guard = self.inner.read();
        find(&guard.root, key)
            .filter(|n| !n.deleted)
            .map(|n| f(&n.value))
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.view(key, |v| v.clone())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.view(key, |_| ()).is_some()
    }

    /// An in-order snapshot of `(key, value)` pairs. Cloning the whole
    /// ordering up front, rather than a lazy cursor, sidesteps holding the
    /// tree lock across iteration -- the natural choice for a
    /// coarse-locked structure shared across threads.
    pub fn iter(&self) -> Vec<(K, V)>
    where
        V: Clone,
    {
        let guard = self.inner.read();
        let mut out = Vec::new();
        in_order_collect(&guard.root, &mut out);
        out.into_iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// A cursor positioned at the smallest key, for callers that want
    /// step-by-step traversal instead of [`Map::iter`]'s snapshot.
    pub fn begin(&self) -> Iter<'_, K, V> {
        let guard = self.inner.read();
        let key = min_key(&guard.root).cloned();
        drop(guard);
        Iter { map: self, key }
    }

    pub fn end(&self) -> Iter<'_, K, V> {
        Iter {
            map: self,
            key: None,
        }
    }
}

impl<K: Ord + Clone, V> Default for Map<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// A key-based cursor into a [`Map`]. Re-derives its neighbor by key under
/// a fresh read lock on every step, so it stays valid even if the node it
/// last pointed at has since been physically removed.
pub struct Iter<'a, K, V> {
    map: &'a Map<K, V>,
    key: Option<K>,
}

impl<'a, K: Ord + Clone, V> Iter<'a, K, V> {
    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    pub fn get(&self) -> Option<V>
    where
        V: Clone,
    {
        self.key.as_ref().and_then(|k| self.map.get(k))
    }

    pub fn advance(&mut self) {
        let guard = self.map.inner.read();
        self.key = match &self.key {
            Some(k) => successor_key(&guard.root, k).cloned(),
            None => None,
        };
    }

    pub fn retreat(&mut self) {
        let guard = self.map.inner.read();
        self.key = match &self.key {
            Some(k) => predecessor_key(&guard.root, k).cloned(),
            None => None,
        };
    }
}

impl<'a, K: PartialEq, V> PartialEq for Iter<'a, K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl<'a, K: Eq, V> Eq for Iter<'a, K, V> {}

impl<'a, K: Clone, V> Clone for Iter<'a, K, V> {
    fn clone(&self) -> Self {
        Iter {
            map: self.map,
            key: self.key.clone(),
        }
    }
}
