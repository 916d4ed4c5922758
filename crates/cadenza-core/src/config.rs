//! Engine sizing and the render format.

use crate::error::{Error, Result};
use crate::format::Format;

/// Fixed limits and the output boundary format for one graph.
///
/// Everything here is decided once, when the graph and its renderer are
/// created; render-side allocations are sized from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Format delivered by the output boundary. Its rate is the render rate.
    pub format: Format,
    /// Largest quantum a single pull may render.
    pub max_frames: usize,
    /// Capacity of the node arena.
    pub max_nodes: usize,
    /// Committed snapshots that may wait for adoption.
    pub staging_depth: usize,
    /// Capacity of the render event ring.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            format: Format::default(),
            max_frames: 512,
            max_nodes: 256,
            staging_depth: 4,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Default limits with the given output format.
    pub fn with_format(format: Format) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    /// Returns a copy with another maximum quantum.
    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Checks that every limit is usable.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("max_frames", self.max_frames),
            ("max_nodes", self.max_nodes),
            ("staging_depth", self.staging_depth),
            ("event_capacity", self.event_capacity),
        ];
        match fields.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(Error::InvalidConfig(format!("{name} must be non-zero"))),
            None => Ok(()),
        }
    }

    /// Depth of the ring returning retired snapshots to the control thread.
    pub(crate) fn retire_depth(&self) -> usize {
        self.staging_depth * 2 + 2
    }
}
