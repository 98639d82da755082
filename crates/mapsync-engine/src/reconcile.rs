use tracing::debug;

use crate::cache::CacheLayer;
use crate::classify::{Decision, FieldMask, UpdateView};
use crate::model::{Edge, Node, NodeId};
use crate::store::DocumentStore;

/// How much re-layout a reconciliation demands, weakest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum RenderRequest {
    /// Nothing visual changed.
    #[default]
    None,
    /// Patch node presentations in place; never invoke the render entry
    /// point (it would unmount the active editing widget).
    DataOnly,
    /// Render only if no local edit is active; otherwise skip and report.
    Soft,
    /// Render regardless, preserving and restoring the active editor.
    Forced,
}

impl RenderRequest {
    pub fn escalate(self, other: Self) -> Self {
        self.max(other)
    }
}

/// What one reconciliation pass did and what must happen next.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub render: RenderRequest,
    /// Nodes whose presentation should be patched directly if the full
    /// render is suppressed or unnecessary.
    pub patch_nodes: Vec<NodeId>,
    /// Nodes whose text changed and need asynchronous remeasurement.
    pub remeasure: Vec<NodeId>,
    /// A node appeared or disappeared; request a forced history snapshot.
    pub snapshot: bool,
}

impl ReconcileOutcome {
    /// Fold a batch member's outcome into the aggregate: strongest render
    /// wins, patch/remeasure sets union, snapshot latches.
    pub fn absorb(&mut self, other: ReconcileOutcome) {
        self.render = self.render.escalate(other.render);
        for id in other.patch_nodes {
            if !self.patch_nodes.contains(&id) {
                self.patch_nodes.push(id);
            }
        }
        for id in other.remeasure {
            if !self.remeasure.contains(&id) {
                self.remeasure.push(id);
            }
        }
        self.snapshot |= other.snapshot;
    }
}

/// Apply a classified decision to the store and caches.
///
/// The decision says what may merge; the view supplies the payload. Edges
/// carried by the event are applied for every non-ignore decision: spatial
/// correctness takes priority over edit continuity.
pub fn apply_update(
    store: &mut DocumentStore,
    caches: &mut CacheLayer,
    decision: &Decision,
    view: UpdateView<'_>,
) -> ReconcileOutcome {
    match decision {
        Decision::Ignore(reason) => {
            debug!(node = %view.node_id, ?reason, "remote update ignored");
            ReconcileOutcome::default()
        }
        Decision::AddNew(id) => add_new(store, caches, id, view),
        Decision::ApplyFull(id) => {
            let mask = FieldMask {
                completed: true,
                rect: true,
                order: true,
            };
            merge_fields(store, caches, id, view, mask, true)
        }
        Decision::ApplyFieldOnly(id, mask) => merge_fields(store, caches, id, view, *mask, false),
        Decision::ApplyStructural(change) => {
            let mut outcome = ReconcileOutcome::default();
            if apply_edge(store, caches, &change.edge) {
                outcome.render = RenderRequest::Soft;
            }
            outcome
        }
    }
}

fn add_new(
    store: &mut DocumentStore,
    caches: &mut CacheLayer,
    id: &NodeId,
    view: UpdateView<'_>,
) -> ReconcileOutcome {
    let data = view.data;
    let order = data.order.unwrap_or_else(|| store.next_order());
    let node = Node {
        id: id.clone(),
        label: data.label.clone().unwrap_or_default(),
        completed: data.completed.unwrap_or(false),
        rect: data.rect,
        order,
    };
    store.insert_node(node);

    if let Some(rect) = data.rect {
        caches.set_size(id.clone(), rect);
    }
    if let Some(edge) = view.edge {
        apply_edge(store, caches, edge);
    }

    let mut outcome = ReconcileOutcome {
        // New content must become visible even while an edit is active.
        render: RenderRequest::Forced,
        snapshot: true,
        ..ReconcileOutcome::default()
    };
    if data.label.is_some() && data.rect.is_none() {
        outcome.remeasure.push(id.clone());
    }
    outcome
}

fn merge_fields(
    store: &mut DocumentStore,
    caches: &mut CacheLayer,
    id: &NodeId,
    view: UpdateView<'_>,
    mask: FieldMask,
    merge_text: bool,
) -> ReconcileOutcome {
    let data = view.data;
    let mut outcome = ReconcileOutcome::default();

    let mut label_changed = false;
    let mut rect_changed = false;
    let mut visual_changed = false;

    {
        let Some(node) = store.node_mut(id) else {
            debug!(node = %id, "merge target vanished before apply");
            return outcome;
        };

        if merge_text {
            if let Some(label) = &data.label {
                if node.label != *label {
                    node.label = label.clone();
                    label_changed = true;
                }
            }
        }
        if mask.completed {
            if let Some(completed) = data.completed {
                if node.completed != completed {
                    node.completed = completed;
                    visual_changed = true;
                }
            }
        }
        if mask.rect {
            if let Some(rect) = data.rect {
                if node.rect != Some(rect) {
                    node.rect = Some(rect);
                    rect_changed = true;
                }
            }
        }
        if mask.order {
            if let Some(order) = data.order {
                if node.order != order {
                    node.order = order;
                    visual_changed = true;
                }
            }
        }
    }

    if label_changed {
        caches.invalidate_for_label_change(store, id);
        outcome.remeasure.push(id.clone());
    }
    if rect_changed {
        // A remote rect is metadata: written through, and the size cache
        // entry replaced rather than invalidated.
        if let Some(rect) = data.rect {
            caches.set_size(id.clone(), rect);
        }
        caches.invalidate_subtree_positions(store, id);
    }

    let edge_changed = view
        .edge
        .is_some_and(|edge| apply_edge(store, caches, edge));

    // Layout-affecting changes want a (skippable) re-layout; checkbox and
    // size write-throughs settle for an in-place patch.
    outcome.render = if edge_changed || label_changed {
        RenderRequest::Soft
    } else if rect_changed || visual_changed {
        RenderRequest::DataOnly
    } else {
        RenderRequest::None
    };
    if label_changed || rect_changed || visual_changed {
        outcome.patch_nodes.push(id.clone());
    }
    outcome
}

/// Apply a bare edge change outside any node decision (batch members whose
/// target carried no patch).
pub fn apply_structural(
    store: &mut DocumentStore,
    caches: &mut CacheLayer,
    edge: &Edge,
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();
    if apply_edge(store, caches, edge) {
        outcome.render = RenderRequest::Soft;
    }
    outcome
}

/// Re-target the edge, dropping cached positions for the moved node and
/// everything under it. Returns true if the tree shape changed.
fn apply_edge(store: &mut DocumentStore, caches: &mut CacheLayer, edge: &Edge) -> bool {
    let target = edge.target.clone();
    if store.set_parent(edge.clone()) {
        caches.invalidate_for_reparent(store, &target);
        return true;
    }
    false
}

/// Remove nodes, pruning edges and cache entries. Idempotent; absent ids
/// are skipped. Position caches for each removed subtree are dropped
/// before removal so orphaned children re-layout cleanly.
pub fn remove_nodes(
    store: &mut DocumentStore,
    caches: &mut CacheLayer,
    ids: &[NodeId],
) -> ReconcileOutcome {
    let mut removed_any = false;
    for id in ids {
        if store.contains(id) {
            caches.invalidate_subtree_positions(store, id);
            store.remove_node(id);
            caches.forget_node(id);
            removed_any = true;
        }
    }

    ReconcileOutcome {
        render: if removed_any {
            RenderRequest::Forced
        } else {
            RenderRequest::None
        },
        snapshot: removed_any,
        ..ReconcileOutcome::default()
    }
}
