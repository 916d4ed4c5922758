//! Cadenza Core - real-time audio graph engine
//!
//! A directed acyclic graph of audio nodes, edited on a control thread and
//! rendered on an audio thread that never allocates, locks, or blocks.
//!
//! # Core Abstractions
//!
//! ## Audio Data
//!
//! - [`Format`] - Sample rate, channel count, layout, and sample format
//! - [`SampleBuffer`] - Fixed-capacity planar `f32` buffer with a frame length
//! - [`FormatConverter`] - Channel mapping, linear resampling, and quantization
//!
//! ## Graph
//!
//! - [`Graph`] - Control-side topology: add, remove, connect, commit
//! - [`Renderer`] - Render-side half: pulls one quantum at a time
//! - [`Processor`] - Trait implemented by every node kernel
//!
//! ## Nodes
//!
//! - [`MixerNode`], [`TapNode`], [`RouteNode`], [`OfflineSource`],
//!   [`InputNode`], and the graph-owned [`OutputNode`]
//!
//! ## Threading Model
//!
//! Edits never touch the snapshot being rendered. [`Graph::commit`] compiles
//! an immutable snapshot (render order, formats, buffer plan) and stages it
//! through a lock-free ring. The renderer swaps it in at its next quantum
//! start and hands the old one back; the control thread frees it once the
//! quantum that retired it has finished. See [`SnapshotState`].
//!
//! # Example
//!
//! ```rust,ignore
//! use cadenza_core::{EngineConfig, Format, Graph, MixerNode, OfflineSource, Pulled, SampleFormat};
//!
//! let format = Format::new(44_100.0, 2, SampleFormat::Float32)?;
//! let (mut graph, mut renderer) = Graph::new(EngineConfig::with_format(format).with_max_frames(1024))?;
//!
//! let source = graph.add_node(OfflineSource::constant(format, 1000, 0.5))?;
//! let mixer = graph.add_node(MixerNode::new(1).with_gain(0, 2.0))?;
//! graph.connect(source, 0, mixer, 0)?;
//! graph.connect(mixer, 0, graph.output(), 0)?;
//! graph.commit()?;
//!
//! // On the audio thread:
//! match renderer.pull(1000)? {
//!     Pulled::Frames(block) => assert!(block.channel(0).iter().all(|&s| s == 1.0)),
//!     Pulled::EndOfStream => {}
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod connection;
pub mod converter;
pub mod error;
pub mod event;
pub mod format;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod offline;
pub mod render;
mod snapshot;
mod sync;

pub use buffer::{BufferPool, BufferView, BufferViewMut, SampleBuffer};
pub use config::EngineConfig;
pub use connection::{Connection, ConnectionId};
pub use converter::{ChannelMap, FormatConverter};
pub use error::{Error, RenderFault, Result};
pub use event::RenderEvent;
pub use format::{Format, MAX_CHANNELS, MAX_RATE_RATIO, SampleFormat};
pub use graph::Graph;
pub use node::{
    FormatRule, Inputs, NodeId, NodeKind, NodeStorage, Outputs, Processor, RenderStatus,
    StorageAllocator,
};
pub use nodes::{
    InputFeed, InputNode, MixerControl, MixerNode, OfflineSource, OutputNode, Route, RouteNode,
    TapBlock, TapNode, TapObserver,
};
pub use offline::{CancelToken, CollectSink, Completion, OfflineOutcome, OfflineRender, OfflineSink};
pub use render::{Pulled, Renderer};
pub use sync::SnapshotState;
