//! # coupled-tree
//!
//! A concurrently accessible ordered map backed by an unbalanced binary search
//! tree.
//!
//! Two lock domains cooperate:
//!
//! - a tree-wide [`RwLock`](parking_lot::RwLock) guarding the shape of the
//!   tree. Lookups take it shared, inserts, removals and teardown take it
//!   exclusively;
//! - a private mutex on every node, taken while that node's fields are read or
//!   written. Writers descend with lock coupling (hand-over-hand): the next
//!   node is locked before the previous one is released.
//!
//! Nodes live in a slot arena and link to each other by index, so splicing a
//! node out never leaves a dangling reference and teardown never recurses.
//!
//! The tree does no rebalancing. Adversarial insert orders degrade it to a
//! list.
//!
//! ## Example
//!
//! ```rust
//! use coupled_tree::{ConcurrentTree, Insertion};
//!
//! let tree: ConcurrentTree<String, &str> = ConcurrentTree::new();
//! for (k, v) in [("d", "delta"), ("b", "bravo"), ("a", "alpha"), ("c", "charlie"), ("e", "echo")] {
//!     assert!(tree.insert(k.to_string(), v).unwrap().is_inserted());
//! }
//!
//! assert_eq!(tree.get("c"), Some("charlie"));
//! assert_eq!(tree.remove("b"), Some("bravo"));
//! assert_eq!(tree.get("b"), None);
//! assert_eq!(tree.insert("a".to_string(), "ALPHA").unwrap(), Insertion::Replaced("alpha"));
//!
//! let mut released = Vec::new();
//! tree.destroy_with(|v| released.push(v));
//! assert_eq!(released.len(), 4);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod arena;
mod coupling;
pub mod error;

pub use error::{Result, TreeError};

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::mem;

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::arena::{Direction, Node, NodeArena, NodeId, MAX_SLOTS};
use crate::coupling::Coupling;

/// Configuration for a [`ConcurrentTree`].
///
/// The default reserves nothing up front and puts no cap on the node count
/// beyond the `u32` slot index space.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeConfig {
    /// Node slots to reserve up front
    pub initial_capacity: usize,
    /// Upper bound on live nodes; inserts of new keys past it fail with
    /// [`TreeError::OutOfMemory`]
    pub max_nodes: Option<usize>,
}

impl TreeConfig {
    fn validate(&self) -> Result<()> {
        if self.initial_capacity > MAX_SLOTS {
            return Err(TreeError::invalid_argument(format!(
                "initial_capacity {} exceeds the {} addressable slots",
                self.initial_capacity, MAX_SLOTS
            )));
        }
        if let Some(max) = self.max_nodes {
            if max == 0 {
                return Err(TreeError::invalid_argument("max_nodes must be non-zero"));
            }
            if max > MAX_SLOTS {
                return Err(TreeError::invalid_argument(format!(
                    "max_nodes {} exceeds the {} addressable slots",
                    max, MAX_SLOTS
                )));
            }
            if self.initial_capacity > max {
                return Err(TreeError::invalid_argument(format!(
                    "initial_capacity {} is larger than max_nodes {}",
                    self.initial_capacity, max
                )));
            }
        }
        Ok(())
    }
}

/// Shape and storage statistics for a tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of stored keys
    pub nodes: usize,
    /// Node slots allocated, live or vacant
    pub slots: usize,
    /// Slots waiting on the free list
    pub vacant_slots: usize,
    /// Nodes on the longest root-to-leaf path (0 for an empty tree)
    pub height: usize,
}

/// Outcome of [`ConcurrentTree::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Insertion<V> {
    /// The key was new; a node was created
    Inserted,
    /// The key existed; its value was swapped and the old one is returned
    Replaced(V),
}

impl<V> Insertion<V> {
    /// Check if a new node was created.
    pub fn is_inserted(&self) -> bool {
        matches!(self, Insertion::Inserted)
    }

    /// The value that was replaced, if any.
    pub fn replaced(self) -> Option<V> {
        match self {
            Insertion::Inserted => None,
            Insertion::Replaced(old) => Some(old),
        }
    }
}

/// Where an insert descent ended.
enum Placement<K, V> {
    Replaced(V),
    Vacant {
        parent: Option<(NodeId, Direction)>,
        key: K,
        value: V,
    },
}

struct TreeInner<K, V> {
    root: NodeId,
    arena: NodeArena<K, V>,
    len: usize,
}

impl<K, V> TreeInner<K, V> {
    /// Release every node in post-order and reset to empty.
    ///
    /// Uses an explicit stack, so degenerate (list-shaped) trees cannot
    /// overflow the call stack.
    fn teardown(&mut self, release: &mut impl FnMut(V)) -> usize {
        let mut released = 0;
        let mut stack: Vec<(NodeId, bool)> = Vec::new();
        if !self.root.is_null() {
            stack.push((self.root, false));
        }

        while let Some((id, children_done)) = stack.pop() {
            if children_done {
                let node = self.arena.take(id);
                release(node.value);
                released += 1;
                continue;
            }
            stack.push((id, true));
            let (left, right) = self.arena.children(id);
            if !right.is_null() {
                stack.push((right, false));
            }
            if !left.is_null() {
                stack.push((left, false));
            }
        }

        self.root = NodeId::NULL;
        self.arena.clear();
        self.len = 0;
        released
    }
}

/// A concurrent ordered map over an unbalanced binary search tree.
///
/// All methods take `&self`; share the tree between threads with an `Arc` or
/// scoped threads. `ConcurrentTree<K, V>` is `Send + Sync` whenever `K` and
/// `V` are `Send`.
pub struct ConcurrentTree<K, V> {
    inner: RwLock<TreeInner<K, V>>,
    config: TreeConfig,
}

impl<K, V> ConcurrentTree<K, V> {
    /// Create an empty tree with the default configuration.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(TreeInner {
                root: NodeId::NULL,
                arena: NodeArena::new(),
                len: 0,
            }),
            config: TreeConfig::default(),
        }
    }

    /// Create an empty tree with the given configuration.
    ///
    /// Fails with [`TreeError::InvalidArgument`] for an unusable
    /// configuration, or [`TreeError::OutOfMemory`] if the initial slots
    /// cannot be reserved.
    pub fn with_config(config: TreeConfig) -> Result<Self> {
        config.validate()?;
        let arena = NodeArena::with_capacity(config.initial_capacity)?;
        debug!(
            initial_capacity = config.initial_capacity,
            max_nodes = ?config.max_nodes,
            "created tree"
        );
        Ok(Self {
            inner: RwLock::new(TreeInner {
                root: NodeId::NULL,
                arena,
                len: 0,
            }),
            config,
        })
    }

    /// The configuration this tree was built with.
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.inner.read().len
    }

    /// Check if the tree holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collect shape and storage statistics.
    ///
    /// Walks every node under the shared tree lock, locking one node at a
    /// time.
    pub fn stats(&self) -> TreeStats {
        let inner = self.inner.read();
        let mut height = 0;
        let mut stack: Vec<(NodeId, usize)> = Vec::new();
        if !inner.root.is_null() {
            stack.push((inner.root, 1));
        }
        while let Some((id, depth)) = stack.pop() {
            height = height.max(depth);
            let guard = inner.arena.lock(id);
            let node = guard.node();
            for child in [node.left, node.right] {
                if !child.is_null() {
                    stack.push((child, depth + 1));
                }
            }
        }
        TreeStats {
            nodes: inner.len,
            slots: inner.arena.num_slots(),
            vacant_slots: inner.arena.num_vacant(),
            height,
        }
    }

    /// Tear the tree down, handing every value to `release` exactly once.
    ///
    /// Values are released in post-order (children before parents). Taking
    /// `self` guarantees no other operation is in flight.
    pub fn destroy_with<F>(self, mut release: F)
    where
        F: FnMut(V),
    {
        let mut inner = self.inner.write();
        let released = inner.teardown(&mut release);
        debug!(released, "tree destroyed");
    }

    /// Tear the tree down, dropping every value.
    pub fn destroy(self) {
        self.destroy_with(drop)
    }
}

impl<K: Ord, V> ConcurrentTree<K, V> {
    /// Run `f` on the value stored for `key`, under the node's lock.
    ///
    /// Takes the tree lock shared, so any number of lookups run together.
    ///
    /// # Deadlocks
    ///
    /// `f` runs while the tree lock and the node's mutex are held. It must not
    /// call back into the same tree: a nested `get` on the same key blocks on
    /// the node mutex, and a nested `insert` or `remove` blocks on the tree
    /// lock. Return what is needed from `f` and use it after the call.
    pub fn get_with<Q, R, F>(&self, key: &Q, f: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
        F: FnOnce(&V) -> R,
    {
        let inner = self.inner.read();
        let mut cur = inner.root;
        while !cur.is_null() {
            let guard = inner.arena.lock(cur);
            let node = guard.node();
            cur = match key.cmp(node.key.borrow()) {
                Ordering::Equal => return Some(f(&node.value)),
                Ordering::Less => node.left,
                Ordering::Greater => node.right,
            };
            // No coupling needed: writers are shut out by the shared tree lock.
        }
        None
    }

    /// Get a clone of the value stored for `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
        V: Clone,
    {
        self.get_with(key, V::clone)
    }

    /// Check if `key` is stored.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get_with(key, |_| ()).is_some()
    }

    /// Insert `key` with `value`, or replace the value of an existing key.
    ///
    /// The stored key is never rewritten on replace. On failure the tree is
    /// unchanged and `key` and `value` are dropped.
    pub fn insert(&self, key: K, value: V) -> Result<Insertion<V>> {
        let mut guard = self.inner.write();
        let TreeInner { root, arena, len } = &mut *guard;

        let outcome = match Self::link(arena, *root, key, value) {
            Placement::Replaced(old) => Ok(Insertion::Replaced(old)),
            Placement::Vacant { parent, key, value } => {
                // Node guards are gone, so the arena may grow. The exclusive
                // tree lock keeps the vacant link where the descent found it.
                Self::allocate(self.config.max_nodes, arena, *len).map(|id| {
                    arena.occupy(id, Node::leaf(key, value));
                    match parent {
                        Some((parent, dir)) => arena.lock(parent).node_mut().set_child(dir, id),
                        None => *root = id,
                    }
                    Insertion::Inserted
                })
            }
        };

        match &outcome {
            Ok(Insertion::Inserted) => {
                *len += 1;
                trace!(len = *len, "inserted key");
            }
            Ok(Insertion::Replaced(_)) => trace!("replaced value"),
            Err(err) => warn!(%err, len = *len, "insert failed"),
        }
        outcome
    }

    fn allocate(max_nodes: Option<usize>, arena: &mut NodeArena<K, V>, len: usize) -> Result<NodeId> {
        match max_nodes {
            Some(limit) if len >= limit => Err(TreeError::out_of_memory(1)),
            _ => arena.reserve(),
        }
    }

    /// Lock-coupled descent from `root` to the key's position. Swaps the
    /// value in place on a match; otherwise reports the empty link to fill.
    fn link(arena: &NodeArena<K, V>, root: NodeId, key: K, value: V) -> Placement<K, V> {
        if root.is_null() {
            return Placement::Vacant { parent: None, key, value };
        }

        let mut path = Coupling::start(arena, root);
        loop {
            let node = path.current_mut();
            let dir = match key.cmp(&node.key) {
                Ordering::Equal => {
                    let old = mem::replace(&mut node.value, value);
                    return Placement::Replaced(old);
                }
                Ordering::Less => Direction::Left,
                Ordering::Greater => Direction::Right,
            };

            let child = node.child(dir);
            if child.is_null() {
                return Placement::Vacant {
                    parent: Some((path.current_id(), dir)),
                    key,
                    value,
                };
            }
            path.advance(child, dir);
        }
    }

    /// Remove `key`, handing its value back to the caller.
    ///
    /// Returns `None` if the key is not stored. When the node has two
    /// children its in-order successor is moved into its place and the
    /// successor's slot is the one freed.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut guard = self.inner.write();
        let TreeInner { root, arena, len } = &mut *guard;
        if root.is_null() {
            trace!("remove on empty tree");
            return None;
        }

        match Self::unlink(arena, root, key) {
            Some((freed, value)) => {
                arena.recycle(freed);
                *len -= 1;
                trace!(len = *len, "removed key");
                Some(value)
            }
            None => {
                trace!("remove: key not found");
                None
            }
        }
    }

    /// Lock-coupled search and splice. Returns the freed slot and the value
    /// stored under `key`.
    fn unlink<Q>(arena: &NodeArena<K, V>, root: &mut NodeId, key: &Q) -> Option<(NodeId, V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut path = Coupling::start(arena, *root);
        loop {
            let node = path.current();
            let dir = match key.cmp(node.key.borrow()) {
                Ordering::Equal => break,
                Ordering::Less => Direction::Left,
                Ordering::Greater => Direction::Right,
            };
            let child = node.child(dir);
            if child.is_null() {
                return None;
            }
            path.advance(child, dir);
        }

        let (left, right) = {
            let node = path.current();
            (node.left, node.right)
        };

        if left.is_null() || right.is_null() {
            let child = if left.is_null() { right } else { left };
            if !path.relink_current(child) {
                *root = child;
            }
            let id = path.current_id();
            let node = path.vacate_current();
            return Some((id, node.value));
        }

        // Two children: the successor's node is the one physically removed.
        let detached = path.lock_successor().detach();
        let target = path.current_mut();
        if let Some(right) = detached.adopt_as_right {
            target.right = right;
        }
        target.key = detached.node.key;
        let old = mem::replace(&mut target.value, detached.node.value);
        trace!(slot = ?detached.id, "spliced out in-order successor");
        Some((detached.id, old))
    }
}

impl<K, V> Default for ConcurrentTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for ConcurrentTree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentTree")
            .field("len", &self.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
impl<K: Clone, V: Clone> ConcurrentTree<K, V> {
    /// In-order `(key, value)` pairs.
    fn snapshot(&self) -> Vec<(K, V)> {
        let inner = self.inner.read();
        let mut out = Vec::with_capacity(inner.len);
        let mut stack = Vec::new();
        let mut cur = inner.root;
        loop {
            while !cur.is_null() {
                stack.push(cur);
                cur = inner.arena.lock(cur).node().left;
            }
            let Some(id) = stack.pop() else { break };
            let guard = inner.arena.lock(id);
            let node = guard.node();
            out.push((node.key.clone(), node.value.clone()));
            cur = node.right;
        }
        out
    }

    fn keys(&self) -> Vec<K> {
        self.snapshot().into_iter().map(|(k, _)| k).collect()
    }

    fn root_key(&self) -> Option<K> {
        let inner = self.inner.read();
        if inner.root.is_null() {
            return None;
        }
        let key = inner.arena.lock(inner.root).node().key.clone();
        Some(key)
    }
}


#[cfg(test)]
mod proptests;
