pub mod cache;
pub mod classify;
pub mod engine;
pub mod events;
pub mod measure;
pub mod model;
pub mod ports;
pub mod reconcile;
pub mod render;
pub mod retry;
pub mod session;
pub mod store;
pub mod testing;

// Re-export key types for easier usage
pub use cache::{CacheLayer, NodeGeometry};
pub use classify::{
    classify, Decision, FieldMask, IgnoreReason, LocalIdentity, StructuralChange, UpdateView,
};
pub use engine::ReconcileEngine;
pub use events::{
    InboundEvent, NodeEditingStatusChanged, NodeUpdated, NodesBatchUpdated, NodesDeleted,
};
pub use model::{Edge, Node, NodeData, NodeId, NodePatch, NodeRect};
pub use ports::{
    ContentMeasure, EditorWidget, FocusPosition, ImageOutcome, LayoutEngine, LayoutError,
    RenderedLayout, SnapshotSink, TextSelection,
};
pub use reconcile::{ReconcileOutcome, RenderRequest};
pub use render::{RenderCoordinator, RenderReport, RenderState};
pub use session::{EditingSessionTracker, PeerPresence, RemotePeerEditState};
pub use store::DocumentStore;
