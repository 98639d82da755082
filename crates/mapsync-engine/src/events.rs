use serde::{Deserialize, Serialize};

use crate::model::{Edge, NodeId, NodePatch};

/// One remote node changed: a partial field patch, optionally with a
/// (re-)parent edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpdated {
    pub scope_id: String,
    pub author_id: String,
    pub node_id: NodeId,
    pub node: NodePatch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<Edge>,
}

/// Remote peer deleted one or more nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodesDeleted {
    pub scope_id: String,
    pub author_id: String,
    pub node_ids: Vec<NodeId>,
}

/// A remote peer started or stopped editing a node. Presence only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeEditingStatusChanged {
    pub scope_id: String,
    pub user_id: String,
    pub user_name: String,
    pub node_id: NodeId,
    pub is_editing: bool,
}

/// Several node patches delivered as one unit, optionally with edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodesBatchUpdated {
    pub scope_id: String,
    pub author_id: String,
    pub nodes: Vec<NodePatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edges: Option<Vec<Edge>>,
}

/// Every inbound payload shape the transport can deliver, tagged the way
/// the channel tags its messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InboundEvent {
    NodeUpdated(NodeUpdated),
    NodesDeleted(NodesDeleted),
    NodeEditingStatusChanged(NodeEditingStatusChanged),
    NodesBatchUpdated(NodesBatchUpdated),
}

impl InboundEvent {
    /// Parse a raw transport message. A malformed payload (unknown tag,
    /// missing required field) is an `Err`; callers drop it without state
    /// change.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeData;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_node_updated_from_wire() {
        let raw = r#"{
            "type": "nodeUpdated",
            "scopeId": "map-1",
            "authorId": "u2",
            "nodeId": "n1",
            "node": {"id": "n1", "data": {"label": "<p>hi</p>", "order": 3}},
            "edge": {"source": "root", "target": "n1"}
        }"#;

        let event = InboundEvent::from_json(raw).unwrap();

        let InboundEvent::NodeUpdated(update) = event else {
            panic!("wrong variant");
        };
        assert_eq!(update.scope_id, "map-1");
        assert_eq!(update.node_id, NodeId::from("n1"));
        assert_eq!(
            update.node.data,
            NodeData {
                label: Some("<p>hi</p>".to_string()),
                order: Some(3),
                ..NodeData::default()
            }
        );
        assert_eq!(update.edge, Some(Edge::new("root", "n1")));
    }

    #[test]
    fn test_batch_without_edges() {
        let raw = r#"{
            "type": "nodesBatchUpdated",
            "scopeId": "map-1",
            "authorId": "u2",
            "nodes": [{"id": "n2", "data": {"label": "hi"}}]
        }"#;

        let event = InboundEvent::from_json(raw).unwrap();
        let InboundEvent::NodesBatchUpdated(batch) = event else {
            panic!("wrong variant");
        };
        assert_eq!(batch.nodes.len(), 1);
        assert!(batch.edges.is_none());
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        // Missing required authorId
        let raw = r#"{"type": "nodesDeleted", "scopeId": "map-1", "nodeIds": ["n1"]}"#;
        assert!(InboundEvent::from_json(raw).is_err());

        // Unknown tag
        let raw = r#"{"type": "somethingElse", "scopeId": "map-1"}"#;
        assert!(InboundEvent::from_json(raw).is_err());

        assert!(InboundEvent::from_json("not json").is_err());
    }

    #[test]
    fn test_editing_status_roundtrip() {
        let event = InboundEvent::NodeEditingStatusChanged(NodeEditingStatusChanged {
            scope_id: "map-1".into(),
            user_id: "u9".into(),
            user_name: "Sam".into(),
            node_id: NodeId::from("n4"),
            is_editing: true,
        });

        let raw = serde_json::to_string(&event).unwrap();
        assert_eq!(InboundEvent::from_json(&raw).unwrap(), event);
    }
}
