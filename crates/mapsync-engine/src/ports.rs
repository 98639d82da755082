use std::collections::HashMap;
use std::rc::Rc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::cache::NodeGeometry;
use crate::model::{Edge, Node, NodeId, NodeRect};

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("layout render failed: {0}")]
    RenderFailed(String),
}

/// Geometry assigned to every node by a completed re-layout.
#[derive(Debug, Default)]
pub struct RenderedLayout {
    pub positions: HashMap<NodeId, NodeGeometry>,
}

/// Terminal state of one embedded image load. Failures count as completion:
/// a broken image still has a final rendered height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOutcome {
    Loaded,
    Failed,
}

/// A content measurement that may still be waiting on embedded images.
pub struct ContentMeasure {
    pub size: NodeRect,
    /// Completion signals for images still loading. The measured height is
    /// only trustworthy once all of these have resolved, either way.
    pub pending_images: Vec<oneshot::Receiver<ImageOutcome>>,
}

/// The tree-layout/paint collaborator.
///
/// Mutating the collection data does NOT re-layout; only `render` does,
/// and `render` unmounts and remounts editing widgets as a side effect.
/// That asymmetry is the whole reason the render coordinator exists.
#[async_trait(?Send)]
pub trait LayoutEngine {
    /// Replace the engine's in-memory node/edge collections without
    /// triggering a re-layout. Bypasses render on purpose.
    fn set_collection_data(&mut self, nodes: Vec<Node>, edges: Vec<Edge>, order: Vec<NodeId>);

    /// Run a full re-layout. Destroys and recreates per-node editing
    /// widgets.
    async fn render(&mut self) -> Result<RenderedLayout, LayoutError>;

    /// The editing widget currently mounted for a node, if any.
    fn editing_widget(&self, id: &NodeId) -> Option<Rc<dyn EditorWidget>>;

    /// Mount a fresh editing widget into a node's (empty) container and
    /// seed it with the given label.
    fn mount_editing_widget(&mut self, id: &NodeId, label: &str);

    /// Whether the node's on-screen group exists and holds a live editor
    /// container.
    fn has_mounted_editor(&self, id: &NodeId) -> bool;

    /// Cheap synchronous size estimate from content alone.
    fn estimate_size(&self, node: &Node) -> NodeRect;

    /// Measure the node's rendered content. None if the node has no
    /// on-screen group. May report pending image loads.
    fn measure_content(&self, id: &NodeId) -> Option<ContentMeasure>;

    /// Patch one node's on-screen presentation (label, completed styling,
    /// size) in place, without re-layout.
    fn patch_node_presentation(&mut self, node: &Node);

    /// Resolve at the next UI repaint tick; geometry reads before this
    /// point may observe a half-updated frame.
    async fn next_frame(&self);
}

/// The rich-text editing widget for one node. Shared handle; the widget
/// lives in the layout engine's DOM-equivalent and may be destroyed by a
/// re-layout at any await point.
pub trait EditorWidget {
    fn content(&self) -> String;
    fn set_content(&self, content: &str, emit_update: bool);
    fn selection(&self) -> TextSelection;
    fn set_selection(&self, from: usize, to: usize);
    fn focus(&self, position: FocusPosition);
    fn is_focused(&self) -> bool;
    fn is_destroyed(&self) -> bool;
    /// Length of the widget's document, for clamping restored selections.
    fn doc_len(&self) -> usize;
}

/// A widget selection snapshot: range plus anchor/head orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSelection {
    pub from: usize,
    pub to: usize,
    pub anchor: usize,
    pub head: usize,
}

impl TextSelection {
    pub fn caret(at: usize) -> Self {
        Self {
            from: at,
            to: at,
            anchor: at,
            head: at,
        }
    }

    /// Clamp into a document of `len` characters.
    pub fn clamped_to(&self, len: usize) -> Self {
        Self {
            from: self.from.min(len),
            to: self.to.min(len),
            anchor: self.anchor.min(len),
            head: self.head.min(len),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPosition {
    Start,
    End,
    Offset(usize),
}

/// History snapshot collaborator. The reconciler requests a forced
/// snapshot whenever nodes appear or disappear, so new and removed content
/// stays recoverable even if the user never saves.
pub trait SnapshotSink {
    fn request_snapshot(&mut self);
}
