//! In-memory fakes for the layout, editor, and snapshot collaborators.
//!
//! Used by this crate's own tests and by downstream integration suites;
//! behavior quirks (mount delays, pending images, refused focus) are
//! scriptable per node.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::cache::NodeGeometry;
use crate::model::{Edge, Node, NodeId, NodeRect};
use crate::ports::{
    ContentMeasure, EditorWidget, FocusPosition, ImageOutcome, LayoutEngine, LayoutError,
    RenderedLayout, SnapshotSink, TextSelection,
};

/// Scriptable rich-text widget. All state is interior-mutable, mirroring a
/// DOM-hosted editor that anything holding the handle can poke.
pub struct FakeWidget {
    content: RefCell<String>,
    selection: Cell<TextSelection>,
    focused: Cell<bool>,
    destroyed: Cell<bool>,
    /// Number of focus() calls to swallow before accepting focus.
    focus_refusals: Cell<u32>,
}

impl FakeWidget {
    pub fn new(content: &str) -> Rc<Self> {
        Rc::new(Self {
            content: RefCell::new(content.to_string()),
            selection: Cell::new(TextSelection::caret(0)),
            focused: Cell::new(false),
            destroyed: Cell::new(false),
            focus_refusals: Cell::new(0),
        })
    }

    /// Create a widget and mount it into the fake layout for `id`.
    pub fn mounted(layout: &mut FakeLayout, id: &str, content: &str) -> Rc<Self> {
        let widget = Self::new(content);
        layout
            .widgets
            .borrow_mut()
            .insert(NodeId::from(id), widget.clone());
        widget
    }

    pub fn destroy(&self) {
        self.destroyed.set(true);
        self.focused.set(false);
    }

    pub fn refuse_focus(&self, times: u32) {
        self.focus_refusals.set(times);
    }
}

impl EditorWidget for FakeWidget {
    fn content(&self) -> String {
        self.content.borrow().clone()
    }

    fn set_content(&self, content: &str, _emit_update: bool) {
        *self.content.borrow_mut() = content.to_string();
    }

    fn selection(&self) -> TextSelection {
        self.selection.get()
    }

    fn set_selection(&self, from: usize, to: usize) {
        self.selection.set(TextSelection {
            from,
            to,
            anchor: from,
            head: to,
        });
    }

    fn focus(&self, _position: FocusPosition) {
        let refusals = self.focus_refusals.get();
        if refusals > 0 {
            self.focus_refusals.set(refusals - 1);
            return;
        }
        self.focused.set(true);
    }

    fn is_focused(&self) -> bool {
        self.focused.get()
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    fn doc_len(&self) -> usize {
        self.content.borrow().chars().count()
    }
}

/// Scriptable layout/paint collaborator.
///
/// `render` destroys and re-creates every mounted widget (seeded from the
/// collection's labels), the way a real re-layout would. Queries for a
/// re-created widget can be delayed by a per-node poll count.
#[derive(Default)]
pub struct FakeLayout {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    order: Vec<NodeId>,
    render_count: usize,
    render_fails: bool,
    widgets: RefCell<HashMap<NodeId, Rc<FakeWidget>>>,
    mount_delay: RefCell<HashMap<NodeId, u32>>,
    delay_after_render: HashMap<NodeId, u32>,
    remount_content: HashMap<NodeId, String>,
    suppressed_remounts: HashSet<NodeId>,
    measures: HashMap<NodeId, NodeRect>,
    image_gates: RefCell<HashMap<NodeId, Vec<oneshot::Receiver<ImageOutcome>>>>,
    patched: Vec<NodeId>,
    mount_log: Vec<(NodeId, String)>,
}

impl FakeLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render_count(&self) -> usize {
        self.render_count
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn patched(&self) -> Vec<NodeId> {
        self.patched.clone()
    }

    pub fn mount_log(&self) -> &[(NodeId, String)] {
        &self.mount_log
    }

    /// After the next render, `editing_widget(id)` returns None for the
    /// first `polls` queries, as if the re-created widget were still
    /// mounting.
    pub fn set_widget_mount_delay(&mut self, id: &str, polls: u32) {
        self.delay_after_render.insert(NodeId::from(id), polls);
    }

    /// Content the re-created widget holds after the next render, instead
    /// of the collection label.
    pub fn set_remount_content(&mut self, id: &str, content: &str) {
        self.remount_content
            .insert(NodeId::from(id), content.to_string());
    }

    /// The node's editor container never reappears; mount requests for it
    /// are swallowed.
    pub fn suppress_editor_remount(&mut self, id: &str) {
        self.suppressed_remounts.insert(NodeId::from(id));
    }

    pub fn set_measure(&mut self, id: &str, rect: NodeRect) {
        self.measures.insert(NodeId::from(id), rect);
    }

    pub fn set_render_fails(&mut self, fails: bool) {
        self.render_fails = fails;
    }

    /// Script a pending image load for the node's next measurement; the
    /// returned sender resolves it.
    pub fn add_pending_image(&mut self, id: &str) -> oneshot::Sender<ImageOutcome> {
        let (tx, rx) = oneshot::channel();
        self.image_gates
            .borrow_mut()
            .entry(NodeId::from(id))
            .or_default()
            .push(rx);
        tx
    }

    fn default_size(&self, label: &str) -> NodeRect {
        NodeRect::new(40.0 + 7.0 * label.chars().count() as f64, 40.0)
    }
}

#[async_trait(?Send)]
impl LayoutEngine for FakeLayout {
    fn set_collection_data(&mut self, nodes: Vec<Node>, edges: Vec<Edge>, order: Vec<NodeId>) {
        self.nodes = nodes;
        self.edges = edges;
        self.order = order;
    }

    async fn render(&mut self) -> Result<RenderedLayout, LayoutError> {
        self.render_count += 1;
        if self.render_fails {
            return Err(LayoutError::RenderFailed("scripted failure".into()));
        }
        self.mount_delay
            .borrow_mut()
            .extend(self.delay_after_render.drain());

        // A re-layout tears down every widget and rebuilds it from the
        // canonical label.
        let previous: Vec<NodeId> = self.widgets.borrow().keys().cloned().collect();
        for id in previous {
            let mut widgets = self.widgets.borrow_mut();
            if let Some(old) = widgets.remove(&id) {
                old.destroy();
            }
            if self.suppressed_remounts.contains(&id) {
                continue;
            }
            let content = self
                .remount_content
                .get(&id)
                .cloned()
                .or_else(|| {
                    self.nodes
                        .iter()
                        .find(|n| n.id == id)
                        .map(|n| n.label.clone())
                })
                .unwrap_or_default();
            widgets.insert(id, FakeWidget::new(&content));
        }

        let mut layout = RenderedLayout::default();
        for (i, id) in self.order.iter().enumerate() {
            let size = self
                .nodes
                .iter()
                .find(|n| &n.id == id)
                .map(|n| n.rect.unwrap_or_else(|| self.default_size(&n.label)))
                .unwrap_or(NodeRect::new(40.0, 40.0));
            layout.positions.insert(
                id.clone(),
                NodeGeometry {
                    x: 0.0,
                    y: i as f64 * 50.0,
                    width: size.width,
                    height: size.height,
                },
            );
        }
        Ok(layout)
    }

    fn editing_widget(&self, id: &NodeId) -> Option<Rc<dyn EditorWidget>> {
        let mut delays = self.mount_delay.borrow_mut();
        if let Some(remaining) = delays.get_mut(id) {
            if *remaining > 0 {
                *remaining = remaining.saturating_sub(1);
                return None;
            }
        }
        self.widgets
            .borrow()
            .get(id)
            .cloned()
            .map(|w| w as Rc<dyn EditorWidget>)
    }

    fn mount_editing_widget(&mut self, id: &NodeId, label: &str) {
        self.mount_log.push((id.clone(), label.to_string()));
        if self.suppressed_remounts.contains(id) {
            return;
        }
        self.widgets
            .borrow_mut()
            .insert(id.clone(), FakeWidget::new(label));
    }

    fn has_mounted_editor(&self, id: &NodeId) -> bool {
        self.widgets.borrow().contains_key(id) || self.suppressed_remounts.contains(id)
    }

    fn estimate_size(&self, node: &Node) -> NodeRect {
        self.measures
            .get(&node.id)
            .copied()
            .unwrap_or_else(|| self.default_size(&node.label))
    }

    fn measure_content(&self, id: &NodeId) -> Option<ContentMeasure> {
        let node = self.nodes.iter().find(|n| &n.id == id)?;
        let size = self
            .measures
            .get(id)
            .copied()
            .unwrap_or_else(|| self.default_size(&node.label));
        let pending_images = self
            .image_gates
            .borrow_mut()
            .remove(id)
            .unwrap_or_default();
        Some(ContentMeasure {
            size,
            pending_images,
        })
    }

    fn patch_node_presentation(&mut self, node: &Node) {
        self.patched.push(node.id.clone());
    }

    async fn next_frame(&self) {
        tokio::time::sleep(Duration::from_millis(16)).await;
    }
}

/// Counts forced history-snapshot requests.
#[derive(Debug, Default)]
pub struct FakeSnapshots {
    count: usize,
}

impl FakeSnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

impl SnapshotSink for FakeSnapshots {
    fn request_snapshot(&mut self) {
        self.count += 1;
    }
}
