use tokio::time::Instant;

use mapsync_config::Tuning;

use crate::model::{Edge, NodeData, NodeId};
use crate::session::EditingSessionTracker;
use crate::store::DocumentStore;

/// Identity of the local editor: which user we are and which document we
/// have open. Events outside this scope, or echoing our own writes, never
/// reach the store.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub user_id: String,
    pub scope_id: String,
}

/// A normalized per-node view of an update, shared between single-node
/// events and batch members.
#[derive(Debug, Clone, Copy)]
pub struct UpdateView<'a> {
    pub scope_id: &'a str,
    pub author_id: &'a str,
    pub node_id: &'a NodeId,
    pub data: &'a NodeData,
    pub edge: Option<&'a Edge>,
}

impl<'a> From<&'a crate::events::NodeUpdated> for UpdateView<'a> {
    fn from(event: &'a crate::events::NodeUpdated) -> Self {
        Self {
            scope_id: &event.scope_id,
            author_id: &event.author_id,
            node_id: &event.node_id,
            data: &event.node.data,
            edge: event.edge.as_ref(),
        }
    }
}

/// Why an event (or its textual part) was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Event belongs to a different document.
    ForeignScope,
    /// Event echoes a write by the local user.
    SelfEcho,
    /// A local bulk save is racing this node; skip to avoid clobbering the
    /// in-flight write.
    SaveInFlight,
    /// The target is under active local edit with uncommitted keystrokes
    /// and the event carries nothing but text.
    ActiveEditProtected,
    /// The patch carries no fields and no edge.
    NoChanges,
}

/// Which non-text fields a field-only merge may write through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldMask {
    pub completed: bool,
    pub rect: bool,
    pub order: bool,
}

impl FieldMask {
    pub fn non_text_of(data: &NodeData) -> Self {
        Self {
            completed: data.completed.is_some(),
            rect: data.rect.is_some(),
            order: data.order.is_some(),
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.completed || self.rect || self.order)
    }
}

/// A pure structural change: re-parent the edge's target, invalidating the
/// moved subtree's positions regardless of edit state.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuralChange {
    pub edge: Edge,
}

/// Merge-and-render policy for one node of one remote event.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Ignore(IgnoreReason),
    /// Target does not exist locally yet.
    AddNew(NodeId),
    /// Merge every carried field, text included.
    ApplyFull(NodeId),
    /// Merge only the masked non-text fields; the text stays with the
    /// local editor.
    ApplyFieldOnly(NodeId, FieldMask),
    /// No content to merge, but the tree shape changes.
    ApplyStructural(StructuralChange),
}

/// Map one remote update onto a merge policy, given the local editing
/// session and document state. Pure: no side effects, all inputs explicit.
///
/// Rules are applied in order; the first that matches wins.
pub fn classify(
    view: UpdateView<'_>,
    session: &EditingSessionTracker,
    store: &DocumentStore,
    identity: &LocalIdentity,
    now: Instant,
    tuning: &Tuning,
) -> Decision {
    // Wrong document
    if view.scope_id != identity.scope_id {
        return Decision::Ignore(IgnoreReason::ForeignScope);
    }

    // No self-echo
    if view.author_id == identity.user_id {
        return Decision::Ignore(IgnoreReason::SelfEcho);
    }

    // A bulk save racing the active node blocks only that node; other
    // nodes merge normally so independent editors don't stall each other.
    if session.is_saving() && session.active_node() == Some(view.node_id) {
        return Decision::Ignore(IgnoreReason::SaveInFlight);
    }

    // Unknown node
    if !store.contains(view.node_id) {
        return Decision::AddNew(view.node_id.clone());
    }

    // The active edit node
    if session.active_node() == Some(view.node_id) {
        let within_grace = session
            .edit_age(now)
            .is_some_and(|age| age < tuning.grace_window());
        if within_grace && !session.has_dirty() {
            // Editor just opened, nothing typed yet: the remote version is
            // newer than anything we hold, take it wholesale.
            return Decision::ApplyFull(view.node_id.clone());
        }
        return protect_text(view);
    }

    // The selected-but-not-edited node; text merges are refused only when
    // the event actually carries text.
    if session.selected_node() == Some(view.node_id) && view.data.label.is_some() {
        return protect_text(view);
    }

    // A bystander node merges fully
    if view.data.is_empty() {
        return match view.edge {
            Some(edge) => Decision::ApplyStructural(StructuralChange { edge: edge.clone() }),
            None => Decision::Ignore(IgnoreReason::NoChanges),
        };
    }
    Decision::ApplyFull(view.node_id.clone())
}

/// Text stays local; non-text fields and structure still merge.
fn protect_text(view: UpdateView<'_>) -> Decision {
    let mask = FieldMask::non_text_of(view.data);
    if !mask.is_empty() {
        return Decision::ApplyFieldOnly(view.node_id.clone(), mask);
    }
    if let Some(edge) = view.edge {
        return Decision::ApplyStructural(StructuralChange { edge: edge.clone() });
    }
    Decision::Ignore(IgnoreReason::ActiveEditProtected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;
    use rstest::rstest;
    use std::time::Duration;

    fn identity() -> LocalIdentity {
        LocalIdentity {
            user_id: "me".into(),
            scope_id: "map-1".into(),
        }
    }

    fn store_with(ids: &[&str]) -> DocumentStore {
        let mut store = DocumentStore::new();
        for (i, id) in ids.iter().enumerate() {
            store.insert_node(Node::new(*id, "", i as i64));
        }
        store
    }

    fn label_data(label: &str) -> NodeData {
        NodeData {
            label: Some(label.to_string()),
            ..NodeData::default()
        }
    }

    fn view<'a>(node_id: &'a NodeId, data: &'a NodeData, edge: Option<&'a Edge>) -> UpdateView<'a> {
        UpdateView {
            scope_id: "map-1",
            author_id: "u2",
            node_id,
            data,
            edge,
        }
    }

    #[rstest]
    #[case("map-2", "u2", IgnoreReason::ForeignScope)]
    #[case("map-1", "me", IgnoreReason::SelfEcho)]
    #[tokio::test]
    async fn test_scope_and_author_filters(
        #[case] scope: &str,
        #[case] author: &str,
        #[case] expected: IgnoreReason,
    ) {
        let store = store_with(&["n1"]);
        let session = EditingSessionTracker::new();
        let id = NodeId::from("n1");
        let data = label_data("x");
        let v = UpdateView {
            scope_id: scope,
            author_id: author,
            node_id: &id,
            data: &data,
            edge: None,
        };

        let decision = classify(
            v,
            &session,
            &store,
            &identity(),
            Instant::now(),
            &Tuning::default(),
        );
        assert_eq!(decision, Decision::Ignore(expected));
    }

    #[tokio::test]
    async fn test_unknown_node_is_add_new() {
        let store = store_with(&[]);
        let session = EditingSessionTracker::new();
        let id = NodeId::from("n1");
        let data = label_data("x");

        let decision = classify(
            view(&id, &data, None),
            &session,
            &store,
            &identity(),
            Instant::now(),
            &Tuning::default(),
        );
        assert_eq!(decision, Decision::AddNew(id));
    }

    #[tokio::test]
    async fn test_bystander_node_applies_full() {
        let store = store_with(&["n1", "n2"]);
        let mut session = EditingSessionTracker::new();
        session.begin_edit(NodeId::from("n2"));
        let id = NodeId::from("n1");
        let data = label_data("x");

        let decision = classify(
            view(&id, &data, None),
            &session,
            &store,
            &identity(),
            Instant::now(),
            &Tuning::default(),
        );
        assert_eq!(decision, Decision::ApplyFull(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_node_within_grace_and_clean_applies_full() {
        let store = store_with(&["n1"]);
        let mut session = EditingSessionTracker::new();
        session.begin_edit(NodeId::from("n1"));
        tokio::time::advance(Duration::from_millis(500)).await;
        let id = NodeId::from("n1");
        let data = label_data("x");

        let decision = classify(
            view(&id, &data, None),
            &session,
            &store,
            &identity(),
            Instant::now(),
            &Tuning::default(),
        );
        assert_eq!(decision, Decision::ApplyFull(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_node_past_grace_protects_text() {
        let store = store_with(&["n1"]);
        let mut session = EditingSessionTracker::new();
        session.begin_edit(NodeId::from("n1"));
        tokio::time::advance(Duration::from_secs(5)).await;
        let id = NodeId::from("n1");
        let data = label_data("x");

        let decision = classify(
            view(&id, &data, None),
            &session,
            &store,
            &identity(),
            Instant::now(),
            &Tuning::default(),
        );
        assert_eq!(decision, Decision::Ignore(IgnoreReason::ActiveEditProtected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_node_dirty_within_grace_protects_text() {
        let store = store_with(&["n1"]);
        let mut session = EditingSessionTracker::new();
        session.begin_edit(NodeId::from("n1"));
        session.mark_dirty(NodeId::from("n1"));
        tokio::time::advance(Duration::from_millis(100)).await;
        let id = NodeId::from("n1");
        let data = label_data("x");

        let decision = classify(
            view(&id, &data, None),
            &session,
            &store,
            &identity(),
            Instant::now(),
            &Tuning::default(),
        );
        assert_eq!(decision, Decision::Ignore(IgnoreReason::ActiveEditProtected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_node_merges_completed_without_text() {
        let store = store_with(&["n1"]);
        let mut session = EditingSessionTracker::new();
        session.begin_edit(NodeId::from("n1"));
        session.mark_dirty(NodeId::from("n1"));
        tokio::time::advance(Duration::from_secs(5)).await;
        let id = NodeId::from("n1");
        let data = NodeData {
            label: Some("x".into()),
            completed: Some(true),
            rect: None,
            order: None,
        };

        let decision = classify(
            view(&id, &data, None),
            &session,
            &store,
            &identity(),
            Instant::now(),
            &Tuning::default(),
        );
        assert_eq!(
            decision,
            Decision::ApplyFieldOnly(
                id,
                FieldMask {
                    completed: true,
                    rect: false,
                    order: false
                }
            )
        );
    }

    #[tokio::test]
    async fn test_save_in_flight_blocks_only_active_node() {
        let store = store_with(&["n1", "n2"]);
        let mut session = EditingSessionTracker::new();
        session.begin_edit(NodeId::from("n1"));
        session.set_saving(true);

        let active = NodeId::from("n1");
        let other = NodeId::from("n2");
        let data = label_data("x");

        let blocked = classify(
            view(&active, &data, None),
            &session,
            &store,
            &identity(),
            Instant::now(),
            &Tuning::default(),
        );
        assert_eq!(blocked, Decision::Ignore(IgnoreReason::SaveInFlight));

        let allowed = classify(
            view(&other, &data, None),
            &session,
            &store,
            &identity(),
            Instant::now(),
            &Tuning::default(),
        );
        assert_eq!(allowed, Decision::ApplyFull(other));
    }

    #[tokio::test]
    async fn test_selected_node_protects_text_but_not_metadata() {
        let store = store_with(&["n1"]);
        let mut session = EditingSessionTracker::new();
        session.select(NodeId::from("n1"));
        let id = NodeId::from("n1");

        let text = label_data("x");
        let decision = classify(
            view(&id, &text, None),
            &session,
            &store,
            &identity(),
            Instant::now(),
            &Tuning::default(),
        );
        assert_eq!(decision, Decision::Ignore(IgnoreReason::ActiveEditProtected));

        // Metadata-only event on the selected node merges fully
        let metadata = NodeData {
            completed: Some(true),
            ..NodeData::default()
        };
        let decision = classify(
            view(&id, &metadata, None),
            &session,
            &store,
            &identity(),
            Instant::now(),
            &Tuning::default(),
        );
        assert_eq!(decision, Decision::ApplyFull(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_protected_node_with_edge_is_structural() {
        let store = store_with(&["root", "n1"]);
        let mut session = EditingSessionTracker::new();
        session.begin_edit(NodeId::from("n1"));
        session.mark_dirty(NodeId::from("n1"));
        tokio::time::advance(Duration::from_secs(5)).await;

        let id = NodeId::from("n1");
        let data = label_data("x");
        let edge = Edge::new("root", "n1");

        let decision = classify(
            view(&id, &data, Some(&edge)),
            &session,
            &store,
            &identity(),
            Instant::now(),
            &Tuning::default(),
        );
        assert_eq!(decision, Decision::ApplyStructural(StructuralChange { edge }));
    }

    #[tokio::test]
    async fn test_empty_patch_without_edge_is_no_changes() {
        let store = store_with(&["n1"]);
        let session = EditingSessionTracker::new();
        let id = NodeId::from("n1");
        let data = NodeData::default();

        let decision = classify(
            view(&id, &data, None),
            &session,
            &store,
            &identity(),
            Instant::now(),
            &Tuning::default(),
        );
        assert_eq!(decision, Decision::Ignore(IgnoreReason::NoChanges));
    }

    #[tokio::test]
    async fn test_empty_patch_with_edge_is_structural() {
        let store = store_with(&["root", "n1"]);
        let session = EditingSessionTracker::new();
        let id = NodeId::from("n1");
        let data = NodeData::default();
        let edge = Edge::new("root", "n1");

        let decision = classify(
            view(&id, &data, Some(&edge)),
            &session,
            &store,
            &identity(),
            Instant::now(),
            &Tuning::default(),
        );
        assert_eq!(decision, Decision::ApplyStructural(StructuralChange { edge }));
    }
}
