use std::collections::{HashMap, HashSet};
use tokio::time::Instant;

use crate::model::NodeId;

/// One local editing session: the node whose rich-text widget has focus and
/// when it gained it.
#[derive(Debug, Clone)]
pub struct EditingSession {
    pub node_id: NodeId,
    pub started_at: Instant,
}

/// Tracks what the local user is doing: the active edit session, the
/// selected node, the dirty set, and whether a bulk save is in flight.
///
/// Read-only to the classifier and reconciler; only the local edit path
/// mutates it. In practice the dirty set is empty or `{active_node_id}` at
/// the moment a remote event is classified.
#[derive(Debug, Default)]
pub struct EditingSessionTracker {
    session: Option<EditingSession>,
    selected: Option<NodeId>,
    dirty: HashSet<NodeId>,
    saving: bool,
}

impl EditingSessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The user focused a node's editor. Any previous session ends; a fresh
    /// session starts clean (no uncommitted keystrokes yet).
    pub fn begin_edit(&mut self, node_id: NodeId) {
        self.dirty.remove(&node_id);
        self.session = Some(EditingSession {
            node_id,
            started_at: Instant::now(),
        });
    }

    /// Focus left the editor (blur, escape, commit).
    pub fn end_edit(&mut self) {
        if let Some(session) = self.session.take() {
            self.dirty.remove(&session.node_id);
        }
    }

    pub fn active_node(&self) -> Option<&NodeId> {
        self.session.as_ref().map(|s| &s.node_id)
    }

    pub fn session(&self) -> Option<&EditingSession> {
        self.session.as_ref()
    }

    /// Age of the active session, if any, measured against `now`.
    pub fn edit_age(&self, now: Instant) -> Option<std::time::Duration> {
        self.session
            .as_ref()
            .map(|s| now.saturating_duration_since(s.started_at))
    }

    pub fn select(&mut self, node_id: NodeId) {
        self.selected = Some(node_id);
    }

    pub fn deselect(&mut self) {
        self.selected = None;
    }

    pub fn selected_node(&self) -> Option<&NodeId> {
        self.selected.as_ref()
    }

    /// A keystroke landed in the active editor.
    pub fn mark_dirty(&mut self, node_id: NodeId) {
        self.dirty.insert(node_id);
    }

    /// Local changes for this node were persisted.
    pub fn clear_dirty(&mut self, node_id: &NodeId) {
        self.dirty.remove(node_id);
    }

    pub fn is_dirty(&self, node_id: &NodeId) -> bool {
        self.dirty.contains(node_id)
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn set_saving(&mut self, saving: bool) {
        self.saving = saving;
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    /// A node was removed: drop every piece of local state referencing it.
    /// Returns true if the active session was cleared.
    pub fn forget_node(&mut self, node_id: &NodeId) -> bool {
        self.dirty.remove(node_id);
        if self.selected.as_ref() == Some(node_id) {
            self.selected = None;
        }
        if self.active_node() == Some(node_id) {
            self.session = None;
            return true;
        }
        false
    }
}

/// Which remote peer claims to be editing which node. Advisory only: used
/// for presence indication, never consulted for conflict resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerPresence {
    pub peer_id: String,
    pub peer_name: String,
}

#[derive(Debug, Default)]
pub struct RemotePeerEditState {
    editing: HashMap<NodeId, PeerPresence>,
}

impl RemotePeerEditState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_editing(&mut self, node_id: NodeId, peer: PeerPresence) {
        self.editing.insert(node_id, peer);
    }

    /// Clear a peer's claim on a node. Ignores mismatched peers so a late
    /// "stopped editing" from a previous editor cannot evict the current one.
    pub fn clear_editing(&mut self, node_id: &NodeId, peer_id: &str) {
        if self
            .editing
            .get(node_id)
            .is_some_and(|p| p.peer_id == peer_id)
        {
            self.editing.remove(node_id);
        }
    }

    pub fn peer_editing(&self, node_id: &NodeId) -> Option<&PeerPresence> {
        self.editing.get(node_id)
    }

    pub fn forget_node(&mut self, node_id: &NodeId) {
        self.editing.remove(node_id);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &PeerPresence)> {
        self.editing.iter()
    }
}
