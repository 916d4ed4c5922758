//! Directed connections between node buses.

use core::fmt;

use crate::converter::ChannelMap;
use crate::node::NodeId;

/// Unique identifier for a connection in a graph. Never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u32);

impl ConnectionId {
    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// A connection from an output bus of one node to an input bus of another.
///
/// Each input bus accepts at most one connection; an output bus may fan out
/// to any number of inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub(crate) source: NodeId,
    pub(crate) source_bus: usize,
    pub(crate) destination: NodeId,
    pub(crate) destination_bus: usize,
    pub(crate) channel_map: Option<ChannelMap>,
}

impl Connection {
    /// Node producing the audio.
    pub fn source(&self) -> NodeId {
        self.source
    }

    /// Output bus on the source node.
    pub fn source_bus(&self) -> usize {
        self.source_bus
    }

    /// Node consuming the audio.
    pub fn destination(&self) -> NodeId {
        self.destination
    }

    /// Input bus on the destination node.
    pub fn destination_bus(&self) -> usize {
        self.destination_bus
    }

    /// Explicit channel map overriding the derived one, if any.
    pub fn channel_map(&self) -> Option<&ChannelMap> {
        self.channel_map.as_ref()
    }
}
