//! Node identity, the processing contract, and the closed set of node variants.
//!
//! Every node in a graph is a [`NodeKind`]. The built-in variants cover mixing,
//! observation, channel routing, and the I/O boundaries; anything else plugs in
//! through [`NodeKind::Custom`] with a boxed [`Processor`]. Rendering dispatches
//! through the [`Processor`] trait, which every variant implements.

use core::fmt;
use std::any::Any;

use crate::buffer::{BufferPool, BufferView, BufferViewMut, SampleBuffer};
use crate::error::RenderFault;
use crate::format::Format;
use crate::nodes::{InputNode, MixerNode, OfflineSource, OutputNode, RouteNode, TapNode};

/// Unique identifier for a node in a graph.
///
/// Node IDs are assigned sequentially and never reused within a graph
/// instance, so creation order and ID order coincide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Outcome of a successful render call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    /// The node produced audio and will keep doing so.
    Continue,
    /// The node has nothing left to produce and rendered silence.
    EndOfStream,
}

/// How a node derives its bus formats when a snapshot is committed.
///
/// Formats flow from sources toward the output boundary in render order.
/// Where a node's required input format differs from what arrives, the
/// connection gets a [`FormatConverter`](crate::converter::FormatConverter).
#[derive(Debug, Clone, PartialEq)]
pub enum FormatRule {
    /// Every output carries this format and every input is converted to it.
    Fixed(Format),
    /// Adopts the format of the lowest connected input bus for all inputs and outputs.
    Follow,
    /// Inputs keep their channel layout but adopt the rate and encoding of the
    /// lowest connected input; output bus `i` carries that format with the
    /// given channel count.
    Channels(Vec<u16>),
}

/// Result of applying a [`FormatRule`] to the formats arriving at a node.
#[derive(Debug, Clone, Default)]
pub(crate) struct Negotiated {
    pub inputs: Vec<Option<Format>>,
    pub outputs: Vec<Option<Format>>,
}

impl FormatRule {
    /// Resolves required input formats and produced output formats.
    ///
    /// `upstream[i]` is the format arriving on input bus `i`, or `None` when
    /// the bus is unconnected or its source has no resolved format.
    pub(crate) fn negotiate(&self, upstream: &[Option<Format>], output_buses: usize) -> Negotiated {
        let base = upstream.iter().flatten().next().copied();
        match self {
            Self::Fixed(format) => Negotiated {
                inputs: upstream.iter().map(|u| u.map(|_| *format)).collect(),
                outputs: vec![Some(*format); output_buses],
            },
            Self::Follow => Negotiated {
                inputs: upstream.iter().map(|u| u.and(base)).collect(),
                outputs: vec![base; output_buses],
            },
            Self::Channels(channels) => {
                let inputs = upstream
                    .iter()
                    .map(|u| {
                        let (u, b) = ((*u)?, base?);
                        u.with_sample_rate(b.sample_rate())
                            .ok()
                            .map(|f| f.with_sample_format(b.sample_format()))
                    })
                    .collect();
                let outputs = (0..output_buses)
                    .map(|bus| {
                        let count = channels.get(bus).copied()?;
                        base?.with_channel_count(count).ok()
                    })
                    .collect();
                Negotiated { inputs, outputs }
            }
        }
    }
}

/// Input buffers visible to a node during one render call.
pub struct Inputs<'a> {
    pub(crate) pool: &'a BufferPool,
    pub(crate) slots: &'a [Option<usize>],
    pub(crate) frames: usize,
}

impl<'a> Inputs<'a> {
    /// Number of input buses.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the node has no input buses.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Frames in this render call.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Audio arriving on `bus`, or `None` if the bus is unconnected.
    #[inline]
    pub fn get(&self, bus: usize) -> Option<BufferView<'a>> {
        let slot = (*self.slots.get(bus)?)?;
        Some(self.pool.get(slot).view())
    }

    /// Iterates `(bus, audio)` for every connected bus.
    pub fn connected(&self) -> impl Iterator<Item = (usize, BufferView<'a>)> + '_ {
        (0..self.slots.len()).filter_map(|bus| self.get(bus).map(|view| (bus, view)))
    }
}

/// Output buffers a node writes during one render call.
///
/// Each buffer is already tagged with the bus format and sized to the frame
/// count; contents are stale until the node writes them.
pub struct Outputs<'a> {
    pub(crate) buffers: &'a mut [SampleBuffer],
    pub(crate) frames: usize,
}

impl Outputs<'_> {
    /// Number of output buses.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Returns true if the node has no output buses.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Frames in this render call.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Writable view of output bus `bus`.
    #[inline]
    pub fn get_mut(&mut self, bus: usize) -> Option<BufferViewMut<'_>> {
        self.buffers.get_mut(bus).map(SampleBuffer::view_mut)
    }

    /// Silences every output bus.
    pub fn clear(&mut self) {
        for buffer in self.buffers.iter_mut() {
            buffer.view_mut().clear();
        }
    }
}

/// Type-erased storage built on the control thread for a node that is
/// already rendering.
pub type NodeStorage = Box<dyn Any + Send>;

/// Control-thread allocator for a node whose storage depends on its format.
///
/// When a commit changes the resolved format or largest quantum of a node
/// that already lives on the render thread, the graph calls
/// [`allocate`](Self::allocate) and ships the result with the snapshot. The
/// renderer hands it to [`Processor::adopt_storage`] at the quantum where that
/// snapshot takes effect.
pub trait StorageAllocator: Send {
    /// Builds storage for `format` and quanta of up to `max_frames` frames.
    fn allocate(&self, format: &Format, max_frames: usize) -> NodeStorage;
}

/// Processing contract shared by every node variant.
///
/// `render` runs on the real-time thread: it must finish in bounded time and
/// must not allocate, block, or take locks. Allocation belongs in `prepare`,
/// which runs on the control thread during the first commit that includes the
/// node. Later format changes go through the node's [`StorageAllocator`].
pub trait Processor: Send {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str {
        "processor"
    }

    /// Number of input buses.
    fn input_bus_count(&self) -> usize {
        1
    }

    /// Number of output buses.
    fn output_bus_count(&self) -> usize {
        1
    }

    /// How bus formats are derived at commit time.
    fn format_rule(&self) -> FormatRule {
        FormatRule::Follow
    }

    /// Returns true if this node eventually reports [`RenderStatus::EndOfStream`].
    fn is_finite(&self) -> bool {
        false
    }

    /// Sizes internal state for `format` and quanta of up to `max_frames` frames.
    fn prepare(&mut self, format: &Format, max_frames: usize);

    /// Renders one quantum from `inputs` into `outputs`.
    fn render(
        &mut self,
        inputs: &Inputs<'_>,
        outputs: &mut Outputs<'_>,
    ) -> Result<RenderStatus, RenderFault>;

    /// Clears internal state without reallocating.
    fn reset(&mut self);

    /// Allocator for format or quantum changes after the first commit.
    /// `None` for nodes whose `prepare` allocates nothing.
    fn storage_allocator(&self) -> Option<Box<dyn StorageAllocator>> {
        None
    }

    /// Swaps in storage built by this node's [`StorageAllocator`].
    ///
    /// Runs on the render thread. The replaced storage must be left in
    /// `storage`; it travels back and is dropped on the control thread.
    fn adopt_storage(&mut self, storage: &mut NodeStorage) {
        let _ = storage;
    }
}

/// The role of a node in the graph.
pub enum NodeKind {
    /// Sums inputs after per-input gain.
    Mixer(MixerNode),
    /// Forwards input and copies it to an observer queue.
    Tap(TapNode),
    /// Routes individual channels between buses.
    Route(RouteNode),
    /// Plays back a decoded buffer.
    Source(OfflineSource),
    /// Reads from a hardware input ring.
    Input(InputNode),
    /// Terminal node whose output is delivered to hardware or an offline sink.
    Output(OutputNode),
    /// User-supplied processor.
    Custom(Box<dyn Processor>),
}

impl NodeKind {
    /// Dispatch target for this variant.
    #[inline]
    pub fn processor(&self) -> &dyn Processor {
        match self {
            Self::Mixer(n) => n,
            Self::Tap(n) => n,
            Self::Route(n) => n,
            Self::Source(n) => n,
            Self::Input(n) => n,
            Self::Output(n) => n,
            Self::Custom(n) => n.as_ref(),
        }
    }

    /// Mutable dispatch target for this variant.
    #[inline]
    pub fn processor_mut(&mut self) -> &mut dyn Processor {
        match self {
            Self::Mixer(n) => n,
            Self::Tap(n) => n,
            Self::Route(n) => n,
            Self::Source(n) => n,
            Self::Input(n) => n,
            Self::Output(n) => n,
            Self::Custom(n) => n.as_mut(),
        }
    }

    /// Diagnostic name.
    pub fn name(&self) -> &'static str {
        self.processor().name()
    }

    /// Returns true for the output boundary.
    pub fn is_output(&self) -> bool {
        matches!(self, Self::Output(_))
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeKind").field(&self.name()).finish()
    }
}

impl From<MixerNode> for NodeKind {
    fn from(node: MixerNode) -> Self {
        Self::Mixer(node)
    }
}

impl From<TapNode> for NodeKind {
    fn from(node: TapNode) -> Self {
        Self::Tap(node)
    }
}

impl From<RouteNode> for NodeKind {
    fn from(node: RouteNode) -> Self {
        Self::Route(node)
    }
}

impl From<OfflineSource> for NodeKind {
    fn from(node: OfflineSource) -> Self {
        Self::Source(node)
    }
}

impl From<InputNode> for NodeKind {
    fn from(node: InputNode) -> Self {
        Self::Input(node)
    }
}

impl From<Box<dyn Processor>> for NodeKind {
    fn from(processor: Box<dyn Processor>) -> Self {
        Self::Custom(processor)
    }
}
