//! Built-in node variants.
//!
//! - [`MixerNode`]: gain-weighted sum of N inputs, clamped to the format range
//! - [`TapNode`]: pass-through that copies blocks to a [`TapObserver`]
//! - [`RouteNode`]: per-channel routing between buses
//! - [`OfflineSource`]: sequential playback of a decoded buffer
//! - [`InputNode`] / [`OutputNode`]: the I/O boundaries

mod boundary;
mod mixer;
mod route;
mod source;
mod tap;

pub use boundary::{InputFeed, InputNode, OutputNode};
pub use mixer::{MixerControl, MixerNode};
pub use route::{Route, RouteNode};
pub use source::OfflineSource;
pub use tap::{TapBlock, TapNode, TapObserver};
