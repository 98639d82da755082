use std::collections::HashSet;
use std::rc::Rc;

use mapsync_config::Tuning;
use tracing::{debug, warn};

use crate::cache::CacheLayer;
use crate::model::NodeId;
use crate::ports::{EditorWidget, FocusPosition, LayoutEngine, TextSelection};
use crate::reconcile::RenderRequest;
use crate::retry::retry_until;
use crate::session::EditingSessionTracker;
use crate::store::DocumentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Idle,
    RenderPending,
    Rendering,
    /// The last soft render was skipped to protect an active edit.
    Suppressed,
}

/// What the coordinator actually did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderReport {
    NoRender,
    /// Node presentations patched in place; render entry point not invoked.
    Patched,
    /// Soft render suppressed by an active edit.
    Skipped,
    Rendered,
}

/// Captured editor state to survive a forced re-layout.
#[derive(Debug, Clone)]
struct EditorSnapshot {
    node_id: NodeId,
    selection: TextSelection,
    focused: bool,
}

/// Decides whether a full re-layout may run, and when one is forced past an
/// active edit, preserves and restores the editor's focus and selection
/// around it.
pub struct RenderCoordinator {
    state: RenderState,
    tuning: Tuning,
    /// Nodes currently under direct style patching. Added before the
    /// mutation, removed once the patch has settled.
    style_updating: HashSet<NodeId>,
}

impl RenderCoordinator {
    pub fn new(tuning: Tuning) -> Self {
        Self {
            state: RenderState::Idle,
            tuning,
            style_updating: HashSet::new(),
        }
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    /// Whether a node's presentation is being patched by the engine right
    /// now. Mutation observers on the layout side consult this to tell
    /// engine-driven style writes apart from user edits.
    pub fn is_style_updating(&self, id: &NodeId) -> bool {
        self.style_updating.contains(id)
    }

    /// Execute a reconciliation's render request. Always pushes the current
    /// collections into the layout engine first, so even a suppressed
    /// render leaves its data consistent.
    pub async fn handle(
        &mut self,
        request: RenderRequest,
        patch_nodes: &[NodeId],
        layout: &mut dyn LayoutEngine,
        store: &DocumentStore,
        caches: &mut CacheLayer,
        session: &EditingSessionTracker,
    ) -> RenderReport {
        let (nodes, edges, order) = store.collection();
        layout.set_collection_data(nodes, edges, order);

        match request {
            RenderRequest::None => RenderReport::NoRender,
            RenderRequest::DataOnly => {
                self.patch_directly(patch_nodes, layout, store);
                RenderReport::Patched
            }
            RenderRequest::Soft => {
                if session.active_node().is_some() {
                    // Rendering now would unmount the live editor; patch
                    // what we can and note the suppression.
                    self.patch_directly(patch_nodes, layout, store);
                    self.state = RenderState::Suppressed;
                    debug!("soft render skipped: edit in progress");
                    return RenderReport::Skipped;
                }
                self.full_render(layout, store, caches).await;
                RenderReport::Rendered
            }
            RenderRequest::Forced => {
                let preserved = self.capture_editor(layout, session);
                self.full_render(layout, store, caches).await;
                if let Some(snapshot) = preserved {
                    self.restore_editor(snapshot, layout, session).await;
                }
                RenderReport::Rendered
            }
        }
    }

    fn patch_directly(
        &mut self,
        patch_nodes: &[NodeId],
        layout: &mut dyn LayoutEngine,
        store: &DocumentStore,
    ) {
        for id in patch_nodes {
            let Some(node) = store.node(id) else { continue };
            self.style_updating.insert(id.clone());
            layout.patch_node_presentation(node);
            self.style_updating.remove(id);
        }
    }

    async fn full_render(
        &mut self,
        layout: &mut dyn LayoutEngine,
        store: &DocumentStore,
        caches: &mut CacheLayer,
    ) {
        self.state = RenderState::RenderPending;
        self.state = RenderState::Rendering;
        match layout.render().await {
            Ok(rendered) => {
                for (id, geometry) in rendered.positions {
                    caches.set_position(id, geometry);
                }
            }
            Err(e) => warn!(error = %e, "re-layout failed; cached positions left invalidated"),
        }

        // Widgets for freshly added nodes come back with empty containers;
        // mount them and seed the canonical label.
        for node in store.nodes() {
            if !layout.has_mounted_editor(&node.id) {
                layout.mount_editing_widget(&node.id, &node.label);
            }
        }

        self.state = RenderState::Idle;
    }

    fn capture_editor(
        &self,
        layout: &dyn LayoutEngine,
        session: &EditingSessionTracker,
    ) -> Option<EditorSnapshot> {
        let node_id = session.active_node()?.clone();
        let widget = layout.editing_widget(&node_id)?;
        if widget.is_destroyed() {
            return None;
        }
        Some(EditorSnapshot {
            selection: widget.selection(),
            focused: widget.is_focused(),
            node_id,
        })
    }

    /// Wait for the re-created widget to mount, clamp the saved selection
    /// into the new document bounds, reapply it, and reassert focus if it
    /// was held before.
    async fn restore_editor(
        &self,
        snapshot: EditorSnapshot,
        layout: &dyn LayoutEngine,
        session: &EditingSessionTracker,
    ) {
        // The session may have moved on while the render was in flight; a
        // stale restore must not touch the new editor.
        if session.active_node() != Some(&snapshot.node_id) {
            debug!(node = %snapshot.node_id, "editor restore abandoned: session changed");
            return;
        }

        let widget: Option<Rc<dyn EditorWidget>> = retry_until(
            || {
                layout
                    .editing_widget(&snapshot.node_id)
                    .filter(|w| !w.is_destroyed())
            },
            self.tuning.widget_poll_attempts,
            self.tuning.widget_poll_interval(),
        )
        .await;
        let Some(widget) = widget else {
            warn!(node = %snapshot.node_id, "editing widget never remounted; selection lost");
            return;
        };

        let clamped = snapshot.selection.clamped_to(widget.doc_len());
        widget.set_selection(clamped.from, clamped.to);

        if snapshot.focused {
            let refocused = retry_until(
                || {
                    if widget.is_focused() {
                        Some(())
                    } else {
                        widget.focus(FocusPosition::Offset(clamped.head));
                        None
                    }
                },
                self.tuning.focus_retry_attempts,
                self.tuning.focus_retry_interval(),
            )
            .await;
            if refocused.is_none() && !widget.is_focused() {
                warn!(node = %snapshot.node_id, "focus reassertion exhausted its budget");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;
    use crate::testing::{FakeLayout, FakeWidget};

    fn store_with(ids: &[&str]) -> DocumentStore {
        let mut store = DocumentStore::new();
        for (i, id) in ids.iter().enumerate() {
            store.insert_node(Node::new(*id, format!("<p>{id}</p>"), i as i64));
        }
        store
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_render_runs_when_idle() {
        let store = store_with(&["n1"]);
        let mut caches = CacheLayer::new();
        let session = EditingSessionTracker::new();
        let mut layout = FakeLayout::new();
        let mut coordinator = RenderCoordinator::new(Tuning::default());

        let report = coordinator
            .handle(
                RenderRequest::Soft,
                &[],
                &mut layout,
                &store,
                &mut caches,
                &session,
            )
            .await;

        assert_eq!(report, RenderReport::Rendered);
        assert_eq!(layout.render_count(), 1);
        assert_eq!(coordinator.state(), RenderState::Idle);
        // Render wrote fresh geometry into the position cache
        assert!(caches.position(&"n1".into()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_render_suppressed_by_active_edit() {
        let store = store_with(&["n1", "n2"]);
        let mut caches = CacheLayer::new();
        let mut session = EditingSessionTracker::new();
        session.begin_edit(NodeId::from("n1"));
        let mut layout = FakeLayout::new();
        let mut coordinator = RenderCoordinator::new(Tuning::default());

        let report = coordinator
            .handle(
                RenderRequest::Soft,
                &[NodeId::from("n2")],
                &mut layout,
                &store,
                &mut caches,
                &session,
            )
            .await;

        assert_eq!(report, RenderReport::Skipped);
        assert_eq!(layout.render_count(), 0);
        assert_eq!(coordinator.state(), RenderState::Suppressed);
        // The changed node still got a direct patch
        assert_eq!(layout.patched(), vec![NodeId::from("n2")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_only_never_invokes_render() {
        let store = store_with(&["n1"]);
        let mut caches = CacheLayer::new();
        let session = EditingSessionTracker::new();
        let mut layout = FakeLayout::new();
        let mut coordinator = RenderCoordinator::new(Tuning::default());

        let report = coordinator
            .handle(
                RenderRequest::DataOnly,
                &[NodeId::from("n1")],
                &mut layout,
                &store,
                &mut caches,
                &session,
            )
            .await;

        assert_eq!(report, RenderReport::Patched);
        assert_eq!(layout.render_count(), 0);
        assert_eq!(layout.patched(), vec![NodeId::from("n1")]);
        // Collection data was still pushed through
        assert_eq!(layout.node_count(), 1);
        // The patch marker is held only across the mutation itself
        assert!(!coordinator.is_style_updating(&"n1".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_render_restores_selection_and_focus() {
        let store = store_with(&["n1"]);
        let mut caches = CacheLayer::new();
        let mut session = EditingSessionTracker::new();
        session.begin_edit(NodeId::from("n1"));

        let mut layout = FakeLayout::new();
        let widget = FakeWidget::mounted(&mut layout, "n1", "<p>n1</p>");
        widget.focus(FocusPosition::End);
        widget.set_selection(2, 5);
        // Widget takes two polls to come back after the re-layout
        layout.set_widget_mount_delay("n1", 2);

        let mut coordinator = RenderCoordinator::new(Tuning::default());
        let report = coordinator
            .handle(
                RenderRequest::Forced,
                &[],
                &mut layout,
                &store,
                &mut caches,
                &session,
            )
            .await;

        assert_eq!(report, RenderReport::Rendered);
        assert_eq!(layout.render_count(), 1);
        let restored = layout.editing_widget(&"n1".into()).unwrap();
        let selection = restored.selection();
        assert_eq!((selection.from, selection.to), (2, 5));
        assert!(restored.is_focused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_render_clamps_selection_to_shorter_doc() {
        let store = store_with(&["n1"]);
        let mut caches = CacheLayer::new();
        let mut session = EditingSessionTracker::new();
        session.begin_edit(NodeId::from("n1"));

        let mut layout = FakeLayout::new();
        let widget = FakeWidget::mounted(&mut layout, "n1", "a long label here");
        widget.focus(FocusPosition::End);
        widget.set_selection(10, 16);
        // The re-created widget holds the canonical (shorter) label
        layout.set_remount_content("n1", "short");

        let mut coordinator = RenderCoordinator::new(Tuning::default());
        coordinator
            .handle(
                RenderRequest::Forced,
                &[],
                &mut layout,
                &store,
                &mut caches,
                &session,
            )
            .await;

        let restored = layout.editing_widget(&"n1".into()).unwrap();
        let selection = restored.selection();
        assert_eq!((selection.from, selection.to), (5, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_widget_never_remounting_is_contained() {
        let store = store_with(&["n1"]);
        let mut caches = CacheLayer::new();
        let mut session = EditingSessionTracker::new();
        session.begin_edit(NodeId::from("n1"));

        let mut layout = FakeLayout::new();
        let widget = FakeWidget::mounted(&mut layout, "n1", "<p>n1</p>");
        widget.focus(FocusPosition::End);
        layout.set_widget_mount_delay("n1", u32::MAX);
        layout.suppress_editor_remount("n1");

        let tuning = Tuning {
            widget_poll_attempts: 3,
            widget_poll_interval_ms: 10,
            ..Tuning::default()
        };
        let mut coordinator = RenderCoordinator::new(tuning);

        // Must complete without panicking despite the widget never coming
        // back; the write is abandoned.
        let report = coordinator
            .handle(
                RenderRequest::Forced,
                &[],
                &mut layout,
                &store,
                &mut caches,
                &session,
            )
            .await;
        assert_eq!(report, RenderReport::Rendered);
        assert_eq!(coordinator.state(), RenderState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_abandoned_when_session_moved_on() {
        let mut session = EditingSessionTracker::new();
        session.begin_edit(NodeId::from("n1"));

        let mut layout = FakeLayout::new();
        let widget = FakeWidget::mounted(&mut layout, "n1", "<p>n1</p>");
        widget.focus(FocusPosition::End);
        widget.set_selection(1, 3);

        let coordinator = RenderCoordinator::new(Tuning::default());
        let snapshot = coordinator.capture_editor(&layout, &session).unwrap();

        // The user switched to editing another node mid-render
        session.begin_edit(NodeId::from("n2"));
        widget.set_selection(0, 0);

        coordinator.restore_editor(snapshot, &layout, &session).await;

        // Stale restore did not reapply the old selection
        let current = layout.editing_widget(&"n1".into()).unwrap();
        assert_eq!((current.selection().from, current.selection().to), (0, 0));
    }
}
