//! Notifications from the render thread to the control thread.

use crate::error::RenderFault;
use crate::node::NodeId;

/// Something the render thread observed during a quantum.
///
/// Events travel through a bounded SPSC ring drained by
/// [`Graph::drain_events`](crate::graph::Graph::drain_events). When the ring is
/// full, new events are dropped and counted instead of blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderEvent {
    /// The render thread switched to snapshot `version` at a quantum start.
    Adopted {
        /// Version now rendering.
        version: u64,
    },
    /// A node failed and its outputs were silenced for one quantum.
    Fault {
        /// Failing node.
        node: NodeId,
        /// Reported condition.
        fault: RenderFault,
    },
    /// Every finite source in snapshot `version` has ended.
    EndOfStream {
        /// Snapshot that ran out.
        version: u64,
    },
}
