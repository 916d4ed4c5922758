//! Pluggable audio backend abstraction.
//!
//! [`AudioBackend`] separates the hardware boundary of a graph from any
//! specific platform audio API. [`CpalBackend`](crate::CpalBackend) is the
//! default; tests drive the same code paths with a backend that invokes the
//! callbacks by hand.
//!
//! ```text
//!   Graph (control thread)          AudioBackend
//!          │ commit                 ┌──────────────────────┐
//!          ▼                        │ build_output_stream  │──▶ device
//!   Renderer ── moved into ───────▶ │   OutputCallback     │
//!   InputFeed ── moved into ──────▶ │ build_input_stream   │◀── device
//!                                   │   InputCallback      │
//!                                   └──────────────────────┘
//! ```
//!
//! Callbacks are boxed closures so the trait stays object-safe, and streams are
//! returned as a type-erased [`StreamHandle`] that stops the stream on drop.

use cadenza_core::Format;

use crate::{AudioDevice, Result};

/// Configuration for building an audio stream.
#[derive(Debug, Clone)]
pub struct BackendStreamConfig {
    /// Requested sample rate in Hz.
    pub sample_rate: u32,
    /// Preferred buffer size in frames.
    pub buffer_size: u32,
    /// Number of interleaved channels.
    pub channels: u16,
    /// Optional device name filter (uses system default if `None`).
    pub device_name: Option<String>,
}

impl Default for BackendStreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            buffer_size: 512,
            channels: 2,
            device_name: None,
        }
    }
}

impl BackendStreamConfig {
    /// Stream settings matching a graph boundary format.
    pub fn for_format(format: &Format, buffer_size: u32, device_name: Option<String>) -> Self {
        Self {
            sample_rate: format.sample_rate().round() as u32,
            buffer_size,
            channels: format.channel_count() as u16,
            device_name,
        }
    }
}

/// Type-erased audio stream handle.
///
/// The stream is active while this handle exists; dropping it stops playback
/// or capture.
pub struct StreamHandle {
    _inner: Box<dyn Send>,
}

impl StreamHandle {
    /// Wraps a backend-specific stream object, keeping it alive until drop.
    pub fn new<T: Send + 'static>(stream: T) -> Self {
        Self {
            _inner: Box::new(stream),
        }
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").finish_non_exhaustive()
    }
}

/// Audio output callback.
///
/// Runs on the device thread and fills an interleaved `f32` buffer of
/// `frames * channels` samples. Must not allocate, lock, or block.
pub type OutputCallback = Box<dyn FnMut(&mut [f32]) + Send>;

/// Audio input callback, receiving captured interleaved `f32` samples.
pub type InputCallback = Box<dyn FnMut(&[f32]) + Send>;

/// Called with a description when the backend hits a streaming error.
pub type ErrorCallback = Box<dyn FnMut(&str) + Send>;

/// Platform audio API behind a graph's hardware boundary.
pub trait AudioBackend: Send {
    /// Human-readable name of this backend (e.g., "cpal", "manual").
    fn name(&self) -> &str;

    /// List all available audio devices.
    fn list_devices(&self) -> Result<Vec<AudioDevice>>;

    /// Get the default output device, if any.
    fn default_output_device(&self) -> Result<Option<AudioDevice>>;

    /// Get the default input device, if any.
    fn default_input_device(&self) -> Result<Option<AudioDevice>>;

    /// Builds and starts an output stream driven by `callback`.
    fn build_output_stream(
        &self,
        config: &BackendStreamConfig,
        callback: OutputCallback,
        error_callback: ErrorCallback,
    ) -> Result<StreamHandle>;

    /// Builds and starts an input stream delivering to `callback`.
    fn build_input_stream(
        &self,
        config: &BackendStreamConfig,
        callback: InputCallback,
        error_callback: ErrorCallback,
    ) -> Result<StreamHandle>;

    /// The sample rate the backend will actually run `config` at.
    ///
    /// Defaults to the requested rate.
    fn actual_sample_rate(&self, config: &BackendStreamConfig) -> u32 {
        config.sample_rate
    }
}
