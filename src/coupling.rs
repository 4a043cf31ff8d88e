//! Hand-over-hand (lock coupling) descent for writers.
//!
//! A [`Coupling`] holds the lock on the node currently being examined and on
//! the node it was reached from. Moving down locks the child first and only
//! then lets go of the grandparent, so at no point does the window have a gap
//! where a relink could slip in unobserved.
//!
//! Writers already hold the tree-wide lock exclusively, so these node locks do
//! not currently exclude anything the structural lock does not. They keep the
//! write paths correct if readers are ever allowed to bypass the tree lock.

use crate::arena::{Direction, Node, NodeArena, NodeGuard, NodeId};

/// Locked window `(parent, current)` of a top-down descent.
pub(crate) struct Coupling<'a, K, V> {
    arena: &'a NodeArena<K, V>,
    /// Parent guard and the link direction taken from it to `current`.
    parent: Option<(NodeGuard<'a, K, V>, Direction)>,
    current: NodeGuard<'a, K, V>,
}

impl<'a, K, V> Coupling<'a, K, V> {
    /// Lock `root` and start a descent there.
    pub(crate) fn start(arena: &'a NodeArena<K, V>, root: NodeId) -> Self {
        debug_assert!(!root.is_null());
        Self {
            arena,
            parent: None,
            current: arena.lock(root),
        }
    }

    #[inline]
    pub(crate) fn current(&self) -> &Node<K, V> {
        self.current.node()
    }

    #[inline]
    pub(crate) fn current_mut(&mut self) -> &mut Node<K, V> {
        self.current.node_mut()
    }

    /// Step to `child`, reached from the current node through `dir`.
    ///
    /// The child is locked before the old parent guard is dropped.
    pub(crate) fn advance(&mut self, child: NodeId, dir: Direction) {
        debug_assert_eq!(self.current().child(dir), child);
        let next = self.arena.lock(child);
        let prev = std::mem::replace(&mut self.current, next);
        self.parent = Some((prev, dir));
    }

    /// Point whatever links to the current node at `replacement` instead.
    ///
    /// Returns `false` when the current node is the root, in which case the
    /// caller owns the root link and must update it.
    pub(crate) fn relink_current(&mut self, replacement: NodeId) -> bool {
        match &mut self.parent {
            Some((parent, dir)) => {
                parent.node_mut().set_child(*dir, replacement);
                true
            }
            None => false,
        }
    }

    /// Id of the current node.
    #[inline]
    pub(crate) fn current_id(&self) -> NodeId {
        self.current.id()
    }

    /// Move the current node out of its slot. Both locks stay held until the
    /// coupling is dropped.
    pub(crate) fn vacate_current(&mut self) -> Node<K, V> {
        self.current.vacate()
    }

    /// Lock the in-order successor of the current node.
    ///
    /// The current node must have a right child. Descends leftwards from it
    /// with lock coupling; the current node itself stays locked throughout.
    pub(crate) fn lock_successor(&self) -> Successor<'a, K, V> {
        let right = self.current().right;
        debug_assert!(!right.is_null());

        let mut parent = None;
        let mut node = self.arena.lock(right);
        loop {
            let left = node.node().left;
            if left.is_null() {
                break;
            }
            let next = self.arena.lock(left);
            // Old parent guard drops here, after `next` is held
            parent = Some(std::mem::replace(&mut node, next));
        }
        Successor { parent, node }
    }
}

/// The leftmost node of a right subtree, locked together with its parent.
///
/// `parent` is `None` when the successor is the right child of the node
/// being removed; that node is already locked by the owning [`Coupling`].
pub(crate) struct Successor<'a, K, V> {
    parent: Option<NodeGuard<'a, K, V>>,
    node: NodeGuard<'a, K, V>,
}

impl<'a, K, V> Successor<'a, K, V> {
    /// Detach the successor from its parent and move it out of its slot.
    ///
    /// The successor has no left child, so its right subtree takes its place.
    /// When the parent is the removal target the caller gets the right subtree
    /// back in `Detached::adopt_as_right` and must store it there.
    pub(crate) fn detach(mut self) -> Detached<K, V> {
        let id = self.node.id();
        let node = self.node.vacate();
        debug_assert!(node.left.is_null());
        let adopt_as_right = match &mut self.parent {
            Some(parent) => {
                parent.node_mut().left = node.right;
                None
            }
            None => Some(node.right),
        };
        Detached {
            id,
            node,
            adopt_as_right,
        }
    }
}

/// A successor spliced out of the tree.
pub(crate) struct Detached<K, V> {
    pub(crate) id: NodeId,
    pub(crate) node: Node<K, V>,
    pub(crate) adopt_as_right: Option<NodeId>,
}
