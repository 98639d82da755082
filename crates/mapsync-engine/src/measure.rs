use futures::future::join_all;
use tracing::debug;

use crate::cache::CacheLayer;
use crate::model::NodeId;
use crate::ports::LayoutEngine;
use crate::reconcile::RenderRequest;
use crate::render::RenderCoordinator;
use crate::session::EditingSessionTracker;
use crate::store::DocumentStore;

/// Remeasure one node after its text content changed, then feed the result
/// back through a narrow second reconciliation pass.
///
/// Suspension points: the next repaint tick, then every embedded image's
/// load/error completion (failures count; a broken image still has a final
/// height). The editing session is re-checked at resume time, not schedule
/// time: if the user has meanwhile started editing this node, the write is
/// abandoned rather than clobbering their editor.
pub async fn remeasure_node(
    id: &NodeId,
    layout: &mut dyn LayoutEngine,
    store: &mut DocumentStore,
    caches: &mut CacheLayer,
    session: &EditingSessionTracker,
    coordinator: &mut RenderCoordinator,
) {
    layout.next_frame().await;

    let Some(measure) = layout.measure_content(id) else {
        debug!(node = %id, "remeasure abandoned: node has no on-screen group");
        return;
    };

    let size = if measure.pending_images.is_empty() {
        measure.size
    } else {
        // Height is untrustworthy until every image has settled, loaded or
        // failed alike.
        join_all(measure.pending_images).await;
        match layout.measure_content(id) {
            Some(settled) => settled.size,
            None => {
                debug!(node = %id, "remeasure abandoned: node unmounted during image load");
                return;
            }
        }
    };

    if session.active_node() == Some(id) {
        debug!(node = %id, "remeasure abandoned: node now under active edit");
        return;
    }
    let Some(node) = store.node_mut(id) else {
        debug!(node = %id, "remeasure abandoned: node removed");
        return;
    };
    if node.rect == Some(size) {
        return;
    }

    node.rect = Some(size);
    caches.set_size(id.clone(), size);
    caches.invalidate_subtree_positions(store, id);

    // Narrow feedback pass: re-layout if nobody is typing, otherwise just
    // patch the node's presentation in place.
    let request = if session.active_node().is_some() {
        RenderRequest::DataOnly
    } else {
        RenderRequest::Forced
    };
    coordinator
        .handle(request, &[id.clone()], layout, store, caches, session)
        .await;
}
