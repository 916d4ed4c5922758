//! Error types for control-domain operations and render-domain faults.
//!
//! Control-domain calls return [`Error`] synchronously and leave the graph
//! untouched on failure. The render thread never returns errors for node
//! misbehaviour; it substitutes silence and reports a [`RenderFault`] through
//! the event ring instead.

use crate::connection::ConnectionId;
use crate::node::NodeId;

/// Errors returned by graph, buffer, and converter operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The node handle is unknown or the node was removed.
    #[error("invalid node handle {0}")]
    InvalidHandle(NodeId),

    /// The connection handle is unknown or was already disconnected.
    #[error("invalid connection handle {0}")]
    InvalidConnection(ConnectionId),

    /// The bus index is out of range for the node.
    #[error("node {node} has no bus {bus}")]
    InvalidBus {
        /// Node addressed by the call.
        node: NodeId,
        /// Requested bus index.
        bus: usize,
    },

    /// The destination bus already has an incoming connection.
    #[error("input bus {bus} of node {node} is already connected")]
    BusOccupied {
        /// Destination node.
        node: NodeId,
        /// Occupied input bus.
        bus: usize,
    },

    /// The connection would close a cycle.
    #[error("connection would create a cycle")]
    CycleDetected,

    /// A frame count or arena size exceeds its fixed capacity.
    #[error("requested {requested} exceeds capacity {capacity}")]
    CapacityExceeded {
        /// Requested amount.
        requested: usize,
        /// Fixed capacity.
        capacity: usize,
    },

    /// No conversion rule exists between two formats, or a format is malformed.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A node was scheduled before one of its sources. Internal invariant breach.
    #[error("node {node} is ordered before its upstream node {upstream}")]
    OrderingViolation {
        /// Node rendered too early.
        node: NodeId,
        /// Source that had not rendered yet.
        upstream: NodeId,
    },

    /// The render thread has not yet consumed previously staged snapshots.
    #[error("staging queue is full; render thread has not adopted pending snapshots")]
    StagingFull,

    /// An engine limit is unusable.
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// The output boundary cannot feed other nodes or be removed.
    #[error("node {0} is the output boundary")]
    BoundaryNode(NodeId),
}

/// Result alias for cadenza-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Condition a node hit while rendering a quantum.
///
/// The affected node's outputs are silenced for that quantum and the fault is
/// delivered to the control domain as a
/// [`RenderEvent::Fault`](crate::event::RenderEvent::Fault).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderFault {
    /// An input ring did not hold enough frames for the quantum.
    Underrun,
    /// A buffer could not hold the frames requested of the node.
    CapacityExceeded,
    /// No kernel was installed for a scheduled node.
    MissingKernel,
    /// Processor-specific failure code.
    Node(u32),
}

impl core::fmt::Display for RenderFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Underrun => write!(f, "input underrun"),
            Self::CapacityExceeded => write!(f, "buffer capacity exceeded"),
            Self::MissingKernel => write!(f, "node kernel missing"),
            Self::Node(code) => write!(f, "node fault {code}"),
        }
    }
}
