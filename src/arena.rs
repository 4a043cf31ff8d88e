//! Slot arena holding the tree's nodes.
//!
//! Nodes never point at each other directly. Links are 32-bit [`NodeId`]
//! indices into a vector of slots, and every slot carries its own mutex, so a
//! traversal can hold several node locks at once while only borrowing the
//! arena immutably. Growing or shrinking the slot vector needs `&mut`, which
//! the tree only has while it holds its structural lock exclusively and no
//! node guard is alive.
//!
//! Vacated slots are threaded onto a free list and reused by later inserts.

use std::mem;

use parking_lot::{Mutex, MutexGuard};

use crate::error::{Result, TreeError};

/// Largest number of slots an arena can address (`u32::MAX` is the null id).
pub(crate) const MAX_SLOTS: usize = u32::MAX as usize;

/// A 32-bit link to a node slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub(crate) struct NodeId(u32);

impl NodeId {
    /// The empty link.
    pub(crate) const NULL: NodeId = NodeId(u32::MAX);

    /// Check if this link is empty.
    #[inline]
    pub(crate) fn is_null(self) -> bool {
        self.0 == u32::MAX
    }

    #[inline]
    fn from_index(index: usize) -> Self {
        debug_assert!(index < MAX_SLOTS);
        Self(index as u32)
    }

    #[inline]
    fn index(self) -> usize {
        debug_assert!(!self.is_null());
        self.0 as usize
    }
}

/// Which child link a descent followed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    Left,
    Right,
}

/// One stored key/value pair and its links.
pub(crate) struct Node<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) left: NodeId,
    pub(crate) right: NodeId,
}

impl<K, V> Node<K, V> {
    pub(crate) fn leaf(key: K, value: V) -> Self {
        Self {
            key,
            value,
            left: NodeId::NULL,
            right: NodeId::NULL,
        }
    }

    #[inline]
    pub(crate) fn child(&self, dir: Direction) -> NodeId {
        match dir {
            Direction::Left => self.left,
            Direction::Right => self.right,
        }
    }

    #[inline]
    pub(crate) fn set_child(&mut self, dir: Direction, id: NodeId) {
        match dir {
            Direction::Left => self.left = id,
            Direction::Right => self.right = id,
        }
    }
}

pub(crate) enum Slot<K, V> {
    Occupied(Node<K, V>),
    Vacant { next_free: NodeId },
}

/// A locked slot that is known to hold a node.
pub(crate) struct NodeGuard<'a, K, V> {
    id: NodeId,
    slot: MutexGuard<'a, Slot<K, V>>,
}

impl<'a, K, V> NodeGuard<'a, K, V> {
    #[inline]
    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub(crate) fn node(&self) -> &Node<K, V> {
        match &*self.slot {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("link to vacant slot {:?}", self.id),
        }
    }

    #[inline]
    pub(crate) fn node_mut(&mut self) -> &mut Node<K, V> {
        match &mut *self.slot {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("link to vacant slot {:?}", self.id),
        }
    }

    /// Move the node out, leaving the slot vacant but not yet on the free list.
    pub(crate) fn vacate(&mut self) -> Node<K, V> {
        let slot = mem::replace(
            &mut *self.slot,
            Slot::Vacant {
                next_free: NodeId::NULL,
            },
        );
        match slot {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("vacating empty slot {:?}", self.id),
        }
    }
}

/// Vector of individually locked node slots plus a free list.
pub(crate) struct NodeArena<K, V> {
    slots: Vec<Mutex<Slot<K, V>>>,
    free_head: NodeId,
    vacant: usize,
}

impl<K, V> NodeArena<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: NodeId::NULL,
            vacant: 0,
        }
    }

    /// Create an arena with room for `capacity` slots.
    pub(crate) fn with_capacity(capacity: usize) -> Result<Self> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| TreeError::out_of_memory(capacity))?;
        Ok(Self {
            slots,
            free_head: NodeId::NULL,
            vacant: 0,
        })
    }

    /// Lock an occupied slot.
    #[inline]
    pub(crate) fn lock(&self, id: NodeId) -> NodeGuard<'_, K, V> {
        NodeGuard {
            id,
            slot: self.slots[id.index()].lock(),
        }
    }

    /// Fill a reserved slot with `node`.
    ///
    /// The slot must come from [`reserve`](Self::reserve) and not be linked
    /// anywhere yet, so locking it cannot invert the top-down lock order.
    pub(crate) fn occupy(&self, id: NodeId, node: Node<K, V>) {
        let mut slot = self.slots[id.index()].lock();
        debug_assert!(matches!(*slot, Slot::Vacant { .. }));
        *slot = Slot::Occupied(node);
    }

    /// Take a vacant slot off the free list, or grow the slot vector by one.
    ///
    /// The returned slot is detached: it is neither linked into the tree nor
    /// on the free list until it is occupied or handed back with
    /// [`recycle`](Self::recycle).
    pub(crate) fn reserve(&mut self) -> Result<NodeId> {
        if !self.free_head.is_null() {
            let id = self.free_head;
            let next = match self.slots[id.index()].get_mut() {
                Slot::Vacant { next_free } => *next_free,
                Slot::Occupied(_) => unreachable!("free list reaches occupied slot {id:?}"),
            };
            self.free_head = next;
            self.vacant -= 1;
            return Ok(id);
        }

        if self.slots.len() >= MAX_SLOTS {
            return Err(TreeError::out_of_memory(1));
        }
        self.slots
            .try_reserve(1)
            .map_err(|_| TreeError::out_of_memory(1))?;
        let id = NodeId::from_index(self.slots.len());
        self.slots.push(Mutex::new(Slot::Vacant {
            next_free: NodeId::NULL,
        }));
        Ok(id)
    }

    /// Put a vacant, unlinked slot back on the free list.
    pub(crate) fn recycle(&mut self, id: NodeId) {
        let slot = self.slots[id.index()].get_mut();
        debug_assert!(matches!(*slot, Slot::Vacant { .. }));
        *slot = Slot::Vacant {
            next_free: self.free_head,
        };
        self.free_head = id;
        self.vacant += 1;
    }

    /// Move a node out of its slot without locking; requires exclusive access.
    pub(crate) fn take(&mut self, id: NodeId) -> Node<K, V> {
        let slot = mem::replace(
            self.slots[id.index()].get_mut(),
            Slot::Vacant {
                next_free: NodeId::NULL,
            },
        );
        match slot {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("taking vacant slot {id:?}"),
        }
    }

    /// Children of an occupied slot; requires exclusive access.
    pub(crate) fn children(&mut self, id: NodeId) -> (NodeId, NodeId) {
        match self.slots[id.index()].get_mut() {
            Slot::Occupied(node) => (node.left, node.right),
            Slot::Vacant { .. } => unreachable!("link to vacant slot {id:?}"),
        }
    }

    /// Drop every slot. Values still stored are dropped in slot order.
    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free_head = NodeId::NULL;
        self.vacant = 0;
    }

    /// Total slots, occupied or vacant.
    pub(crate) fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Slots currently on the free list.
    pub(crate) fn num_vacant(&self) -> usize {
        self.vacant
    }
}
