use std::collections::HashMap;

use mapsync_config::Tuning;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::CacheLayer;
use crate::classify::{classify, Decision, LocalIdentity, UpdateView};
use crate::events::{
    InboundEvent, NodeEditingStatusChanged, NodeUpdated, NodesBatchUpdated, NodesDeleted,
};
use crate::measure::remeasure_node;
use crate::model::{Edge, NodeId};
use crate::ports::{EditorWidget, LayoutEngine, SnapshotSink};
use crate::reconcile::{self, ReconcileOutcome};
use crate::render::RenderCoordinator;
use crate::session::{EditingSessionTracker, PeerPresence, RemotePeerEditState};
use crate::store::DocumentStore;

/// The reconciliation engine: owns the canonical document, caches, and
/// local-edit state, and exposes one handler per inbound payload shape.
///
/// Handlers process events in arrival order and never yield mid-mutation;
/// every failure is contained, so no event can halt the stream.
pub struct ReconcileEngine<L: LayoutEngine, S: SnapshotSink> {
    identity: LocalIdentity,
    tuning: Tuning,
    store: DocumentStore,
    caches: CacheLayer,
    session: EditingSessionTracker,
    presence: RemotePeerEditState,
    coordinator: RenderCoordinator,
    layout: L,
    snapshots: S,
}

impl<L: LayoutEngine, S: SnapshotSink> ReconcileEngine<L, S> {
    pub fn new(identity: LocalIdentity, tuning: Tuning, layout: L, snapshots: S) -> Self {
        Self {
            identity,
            coordinator: RenderCoordinator::new(tuning.clone()),
            tuning,
            store: DocumentStore::new(),
            caches: CacheLayer::new(),
            session: EditingSessionTracker::new(),
            presence: RemotePeerEditState::new(),
            layout,
            snapshots,
        }
    }

    /// Entry point for raw transport messages. Malformed payloads are
    /// dropped with no state change.
    pub async fn handle_message(&mut self, raw: &str) {
        match InboundEvent::from_json(raw) {
            Ok(event) => self.dispatch(event).await,
            Err(e) => debug!(error = %e, "malformed event dropped"),
        }
    }

    pub async fn dispatch(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::NodeUpdated(event) => self.handle_node_updated(event).await,
            InboundEvent::NodesDeleted(event) => self.handle_nodes_deleted(event).await,
            InboundEvent::NodeEditingStatusChanged(event) => {
                self.handle_node_editing_status_changed(event)
            }
            InboundEvent::NodesBatchUpdated(event) => self.handle_nodes_batch_updated(event).await,
        }
    }

    pub async fn handle_node_updated(&mut self, event: NodeUpdated) {
        let view = UpdateView::from(&event);
        let decision = classify(
            view,
            &self.session,
            &self.store,
            &self.identity,
            Instant::now(),
            &self.tuning,
        );
        let push_label = self.accepts_label_into_editor(&decision, view);
        let outcome = reconcile::apply_update(&mut self.store, &mut self.caches, &decision, view);
        let push = if push_label {
            vec![event.node_id.clone()]
        } else {
            Vec::new()
        };
        self.settle(outcome, push).await;
    }

    pub async fn handle_nodes_deleted(&mut self, event: NodesDeleted) {
        if event.scope_id != self.identity.scope_id {
            return;
        }
        if event.author_id == self.identity.user_id {
            return;
        }

        // Local state referencing a doomed node goes first, so nothing
        // downstream observes a session pointing at a missing node.
        for id in &event.node_ids {
            if self.session.forget_node(id) {
                debug!(node = %id, "active edit node deleted remotely; session cleared");
            }
            self.presence.forget_node(id);
        }

        let outcome = reconcile::remove_nodes(&mut self.store, &mut self.caches, &event.node_ids);
        self.settle(outcome, Vec::new()).await;
    }

    /// Presence only: records which peer claims to be editing which node.
    /// Never consulted for conflict resolution.
    pub fn handle_node_editing_status_changed(&mut self, event: NodeEditingStatusChanged) {
        if event.scope_id != self.identity.scope_id {
            return;
        }
        if event.user_id == self.identity.user_id {
            return;
        }

        if event.is_editing {
            self.presence.set_editing(
                event.node_id,
                PeerPresence {
                    peer_id: event.user_id,
                    peer_name: event.user_name,
                },
            );
        } else {
            self.presence.clear_editing(&event.node_id, &event.user_id);
        }
    }

    pub async fn handle_nodes_batch_updated(&mut self, event: NodesBatchUpdated) {
        if event.scope_id != self.identity.scope_id {
            return;
        }
        if event.author_id == self.identity.user_id {
            return;
        }

        let edges_by_target: HashMap<&NodeId, &Edge> = event
            .edges
            .iter()
            .flatten()
            .map(|e| (&e.target, e))
            .collect();

        let now = Instant::now();
        let mut aggregate = ReconcileOutcome::default();
        let mut push_labels = Vec::new();

        for patch in &event.nodes {
            let view = UpdateView {
                scope_id: &event.scope_id,
                author_id: &event.author_id,
                node_id: &patch.id,
                data: &patch.data,
                edge: edges_by_target.get(&patch.id).copied(),
            };
            let decision = classify(
                view,
                &self.session,
                &self.store,
                &self.identity,
                now,
                &self.tuning,
            );
            if self.accepts_label_into_editor(&decision, view) {
                push_labels.push(patch.id.clone());
            }
            aggregate.absorb(reconcile::apply_update(
                &mut self.store,
                &mut self.caches,
                &decision,
                view,
            ));
        }

        // Edges whose target carried no patch are still structural changes
        // in their own right.
        let patched_targets: Vec<&NodeId> = event.nodes.iter().map(|p| &p.id).collect();
        for edge in event.edges.iter().flatten() {
            if !patched_targets.contains(&&edge.target) && self.store.contains(&edge.target) {
                aggregate.absorb(reconcile::apply_structural(
                    &mut self.store,
                    &mut self.caches,
                    edge,
                ));
            }
        }

        self.settle(aggregate, push_labels).await;
    }

    /// Grace-window full apply on the active node must also reach the live
    /// editor, not just the store.
    fn accepts_label_into_editor(&self, decision: &Decision, view: UpdateView<'_>) -> bool {
        matches!(decision, Decision::ApplyFull(id) if self.session.active_node() == Some(id))
            && view.data.label.is_some()
    }

    fn push_label_into_editor(&self, id: &NodeId) {
        let Some(node) = self.store.node(id) else {
            return;
        };
        if let Some(widget) = self.layout.editing_widget(id) {
            if !widget.is_destroyed() {
                widget.set_content(&node.label, false);
            }
        }
    }

    /// Shared tail of every mutating handler: snapshot side effect, render
    /// coordination, then the deferred remeasure passes.
    async fn settle(&mut self, outcome: ReconcileOutcome, push_labels: Vec<NodeId>) {
        if outcome.snapshot {
            self.snapshots.request_snapshot();
        }

        // Nodes awaiting async measurement get a synchronous estimate so
        // the imminent layout has a size to work with.
        for id in &outcome.remeasure {
            if self.caches.size(id).is_none() {
                if let Some(node) = self.store.node(id) {
                    self.caches.set_size(id.clone(), self.layout.estimate_size(node));
                }
            }
        }

        self.coordinator
            .handle(
                outcome.render,
                &outcome.patch_nodes,
                &mut self.layout,
                &self.store,
                &mut self.caches,
                &self.session,
            )
            .await;

        for id in &push_labels {
            self.push_label_into_editor(id);
        }

        for id in &outcome.remeasure {
            remeasure_node(
                id,
                &mut self.layout,
                &mut self.store,
                &mut self.caches,
                &self.session,
                &mut self.coordinator,
            )
            .await;
        }
    }

    // Local edit path: the UI calls these as the user focuses, types,
    // selects, and saves. The reconciliation side only ever reads them.

    pub fn begin_local_edit(&mut self, id: NodeId) {
        self.session.begin_edit(id);
    }

    pub fn end_local_edit(&mut self) {
        self.session.end_edit();
    }

    pub fn mark_local_dirty(&mut self, id: NodeId) {
        self.session.mark_dirty(id);
    }

    pub fn select_node(&mut self, id: NodeId) {
        self.session.select(id);
    }

    pub fn deselect_node(&mut self) {
        self.session.deselect();
    }

    pub fn set_saving(&mut self, saving: bool) {
        self.session.set_saving(saving);
    }

    // Read access for the UI and for tests.

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn caches(&self) -> &CacheLayer {
        &self.caches
    }

    pub fn session(&self) -> &EditingSessionTracker {
        &self.session
    }

    pub fn presence(&self) -> &RemotePeerEditState {
        &self.presence
    }

    pub fn layout(&self) -> &L {
        &self.layout
    }

    pub fn layout_mut(&mut self) -> &mut L {
        &mut self.layout
    }

    pub fn snapshots(&self) -> &S {
        &self.snapshots
    }
}
