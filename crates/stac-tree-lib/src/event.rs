//! Change notifications for the presentation layer

use crate::latch::LoadState;
use crate::node::NodeId;
use crate::TreeError;

/// Something in the tree changed
///
/// Delivered over a broadcast channel from [`crate::CatalogTree::subscribe`]. Slow subscribers
/// may lag and miss events; they can always re-read the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeEvent {
    /// A (re)load produced a new root; node ids from earlier generations are invalid
    RootLoaded { root: NodeId },
    /// Nodes were appended to `parent`'s children, in order
    ChildrenAppended {
        parent: NodeId,
        children: Vec<NodeId>,
    },
    /// A Collection moved through its lazy-load state machine
    LoadStateChanged { node: NodeId, state: LoadState },
    /// A localized failure was recorded on `node`
    NodeFailed { node: NodeId, error: TreeError },
    /// Visibility was recomputed under an active query
    VisibilityChanged { query: String, visible: usize },
}
