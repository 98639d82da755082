mod edge;
mod node;

pub use edge::Edge;
pub use node::{Node, NodeData, NodeId, NodePatch, NodeRect};
