use std::collections::HashMap;

use crate::model::{NodeId, NodeRect};
use crate::store::DocumentStore;

/// Computed on-screen geometry for one node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeGeometry {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Per-node size and screen-position caches.
///
/// Entries are either absent or consistent with the document store:
/// staleness is actively cleared on label change, re-parenting, and size
/// change, never tolerated. Subtree invalidation is transitive over the
/// store's child adjacency.
#[derive(Debug, Default)]
pub struct CacheLayer {
    sizes: HashMap<NodeId, NodeRect>,
    positions: HashMap<NodeId, NodeGeometry>,
}

impl CacheLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self, id: &NodeId) -> Option<NodeRect> {
        self.sizes.get(id).copied()
    }

    pub fn set_size(&mut self, id: NodeId, rect: NodeRect) {
        self.sizes.insert(id, rect);
    }

    pub fn invalidate_size(&mut self, id: &NodeId) {
        self.sizes.remove(id);
    }

    pub fn position(&self, id: &NodeId) -> Option<NodeGeometry> {
        self.positions.get(id).copied()
    }

    pub fn set_position(&mut self, id: NodeId, geometry: NodeGeometry) {
        self.positions.insert(id, geometry);
    }

    pub fn invalidate_position(&mut self, id: &NodeId) {
        self.positions.remove(id);
    }

    /// Drop cached positions for `id` and every descendant reachable via
    /// edges. Used when a node's parent edge or size changes: everything
    /// below it may move.
    pub fn invalidate_subtree_positions(&mut self, store: &DocumentStore, id: &NodeId) {
        self.positions.remove(id);
        for descendant in store.descendants_of(id) {
            self.positions.remove(&descendant);
        }
    }

    /// A node's label changed: its size is unknown again and its subtree
    /// may shift.
    pub fn invalidate_for_label_change(&mut self, store: &DocumentStore, id: &NodeId) {
        self.sizes.remove(id);
        self.invalidate_subtree_positions(store, id);
    }

    /// A node was re-parented: size estimates keyed on depth and every
    /// position below it are stale.
    pub fn invalidate_for_reparent(&mut self, store: &DocumentStore, id: &NodeId) {
        self.sizes.remove(id);
        self.invalidate_subtree_positions(store, id);
    }

    /// Drop every entry for a removed node.
    pub fn forget_node(&mut self, id: &NodeId) {
        self.sizes.remove(id);
        self.positions.remove(id);
    }

    #[cfg(test)]
    pub(crate) fn position_count(&self) -> usize {
        self.positions.len()
    }
}
