use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier for a mindmap node.
///
/// Ids are minted by the (out-of-scope) identifier generator and arrive on
/// the wire as opaque strings; the engine never inspects their shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Cached visual extent of a rendered node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeRect {
    pub width: f64,
    pub height: f64,
}

impl NodeRect {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// A mindmap node as held by the document store.
///
/// `label` is serialized rich-text markup; the engine treats it as opaque
/// and only ever replaces it wholesale. `order` is the node's insertion
/// rank, used to keep creation order deterministic across peers.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub label: String,
    pub completed: bool,
    pub rect: Option<NodeRect>,
    pub order: i64,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, label: impl Into<String>, order: i64) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            completed: false,
            rect: None,
            order,
        }
    }
}

/// Partial node fields carried by a remote update.
///
/// Every field is optional: a remote editor only sends what it changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeData {
    pub label: Option<String>,
    pub completed: Option<bool>,
    pub rect: Option<NodeRect>,
    pub order: Option<i64>,
}

impl NodeData {
    /// True when the patch carries no fields at all.
    pub fn is_empty(&self) -> bool {
        self.label.is_none()
            && self.completed.is_none()
            && self.rect.is_none()
            && self.order.is_none()
    }

    /// True when the patch carries any non-text field.
    pub fn has_non_text_fields(&self) -> bool {
        self.completed.is_some() || self.rect.is_some() || self.order.is_some()
    }
}

/// A node-scoped update payload: the target id plus its changed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePatch {
    pub id: NodeId,
    #[serde(default)]
    pub data: NodeData,
}
