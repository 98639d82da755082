use std::collections::{HashMap, HashSet};

use crate::model::{Edge, Node, NodeId};

/// Canonical mutable document state: nodes, edges, and an insertion-order
/// index.
///
/// The store owns the single-parent invariant (adding an edge retargets the
/// child's previous parent edge away) and maintains a child adjacency index
/// so subtree queries never walk the raw edge list.
#[derive(Debug, Default)]
pub struct DocumentStore {
    nodes: HashMap<NodeId, Node>,
    edges: Vec<Edge>,
    /// Node ids in creation order. Survives field updates; only explicit
    /// removal drops an entry.
    order_index: Vec<NodeId>,
    children: HashMap<NodeId, Vec<NodeId>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order_index.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn order_index(&self) -> &[NodeId] {
        &self.order_index
    }

    /// Next free insertion rank, for nodes arriving without an explicit
    /// `order` field.
    pub fn next_order(&self) -> i64 {
        self.nodes
            .values()
            .map(|n| n.order)
            .max()
            .map_or(0, |max| max + 1)
    }

    /// Insert a brand-new node. Returns false (and leaves the store
    /// untouched) if the id is already present; use `node_mut` for updates.
    pub fn insert_node(&mut self, node: Node) -> bool {
        if self.nodes.contains_key(&node.id) {
            return false;
        }
        self.order_index.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
        true
    }

    /// Attach `edge.target` under `edge.source`, displacing any previous
    /// parent edge of the target (single-parent invariant).
    ///
    /// Returns true if the tree shape actually changed.
    pub fn set_parent(&mut self, edge: Edge) -> bool {
        if self.parent_of(&edge.target) == Some(&edge.source) {
            return false;
        }

        self.detach_from_parent(&edge.target);
        self.children
            .entry(edge.source.clone())
            .or_default()
            .push(edge.target.clone());
        self.edges.push(edge);
        true
    }

    pub fn parent_of(&self, id: &NodeId) -> Option<&NodeId> {
        self.edges
            .iter()
            .find(|e| &e.target == id)
            .map(|e| &e.source)
    }

    pub fn children_of(&self, id: &NodeId) -> &[NodeId] {
        self.children.get(id).map_or(&[], Vec::as_slice)
    }

    /// Every node reachable from `id` via child edges, excluding `id`
    /// itself. Iterative walk over the adjacency index; a visited set keeps
    /// a cyclic edge payload from a misbehaving peer from looping forever.
    pub fn descendants_of(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<&NodeId> = self.children_of(id).iter().collect();

        while let Some(next) = stack.pop() {
            if !visited.insert(next.clone()) {
                continue;
            }
            out.push(next.clone());
            stack.extend(self.children_of(next));
        }

        out
    }

    /// Remove a node and prune every edge referencing it. Idempotent:
    /// removing an absent id is a no-op returning false.
    pub fn remove_node(&mut self, id: &NodeId) -> bool {
        if self.nodes.remove(id).is_none() {
            return false;
        }

        self.order_index.retain(|n| n != id);
        self.detach_from_parent(id);
        // Orphan the node's own children rather than cascading the delete;
        // remote deletions name every id they intend to remove.
        self.children.remove(id);
        self.edges.retain(|e| !e.touches(id));
        true
    }

    fn detach_from_parent(&mut self, id: &NodeId) {
        if let Some(parent) = self.parent_of(id).cloned() {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.retain(|c| c != id);
            }
            self.edges.retain(|e| &e.target != id);
        }
    }

    /// Clone out the full collection in the shape the layout engine takes.
    pub fn collection(&self) -> (Vec<Node>, Vec<Edge>, Vec<NodeId>) {
        (
            self.nodes().cloned().collect(),
            self.edges.clone(),
            self.order_index.clone(),
        )
    }
}
