//! Node identifiers for the graph store.
//!
//! Every type, property, individual, and bookkeeping node (rule definitions,
//! evaluations, scope parts, repair nodes) is identified by a [`NodeId`].
//! The [`AtomicNodeAllocator`] hands out fresh ids and can be advanced past
//! ids that arrive from a replicated branch.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Unique, niche-optimized identifier for a node.
///
/// Uses `NonZeroU64` so that `Option<NodeId>` is the same size as `NodeId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NodeId(NonZeroU64);

impl NodeId {
    /// Create a `NodeId` from a raw `u64`.
    ///
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(NodeId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

/// Thread-safe node id allocator.
///
/// Produces monotonically increasing ids starting from 1.
#[derive(Debug)]
pub struct AtomicNodeAllocator {
    next: AtomicU64,
}

impl AtomicNodeAllocator {
    /// Create a new allocator that starts from id 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Create an allocator that resumes from a given id.
    pub fn starting_from(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start.max(1)),
        }
    }

    /// Allocate the next node id.
    pub fn next_id(&self) -> Result<NodeId, GraphError> {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        NodeId::new(raw).ok_or(GraphError::AllocatorExhausted)
    }

    /// Make sure `id` is never handed out again.
    ///
    /// Called when a node created on another branch is replayed locally.
    pub fn observe(&self, id: NodeId) {
        self.advance_to(id.get().saturating_add(1));
    }

    /// Move the allocator forward so the next id is at least `next`.
    pub fn advance_to(&self, next: u64) {
        self.next.fetch_max(next, Ordering::Relaxed);
    }

    /// Return the next id that *would* be allocated, without consuming it.
    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for AtomicNodeAllocator {
    fn default() -> Self {
        Self::new()
    }
}
