//! Audio I/O for the Cadenza graph engine.
//!
//! This crate provides:
//!
//! - **WAV file I/O**: [`WavFileReader`] decodes files into [`OfflineSource`]
//!   nodes; [`WavFileWriter`] is an [`OfflineSink`] for offline renders
//! - **Backends**: the [`AudioBackend`] trait and its cpal implementation
//!   [`CpalBackend`]
//! - **Hardware streaming**: [`AudioIo`] moves a [`Renderer`] into a device
//!   output callback and feeds device input into an [`InputNode`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cadenza_core::{EngineConfig, Graph, OfflineRender};
//! use cadenza_io::{WavFileReader, WavFileWriter};
//!
//! let reader = WavFileReader::open("input.wav")?;
//! let format = reader.format();
//! let (mut graph, mut renderer) = Graph::new(EngineConfig::with_format(format))?;
//! let source = graph.add_node(reader.into_source()?)?;
//! graph.connect(source, 0, graph.output(), 0)?;
//! graph.commit()?;
//!
//! let mut writer = WavFileWriter::create("output.wav", format)?;
//! OfflineRender::new(&mut renderer).run(&mut writer)?;
//! writer.finalize()?;
//! ```
//!
//! [`OfflineSource`]: cadenza_core::OfflineSource
//! [`OfflineSink`]: cadenza_core::OfflineSink
//! [`Renderer`]: cadenza_core::Renderer
//! [`InputNode`]: cadenza_core::InputNode

pub mod backend;
pub mod cpal_backend;
mod devices;
mod hardware;
mod wav;

pub use backend::{
    AudioBackend, BackendStreamConfig, ErrorCallback, InputCallback, OutputCallback, StreamHandle,
};
pub use cpal_backend::CpalBackend;
pub use devices::{AudioDevice, default_device, list_devices};
pub use hardware::AudioIo;
pub use wav::{WavFileReader, WavFileWriter, WavInfo, read_wav_info, sample_format_for, wav_spec_for};

/// Error types for audio I/O operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// WAV file read/write error.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// Graph engine error.
    #[error("Engine error: {0}")]
    Engine(#[from] cadenza_core::Error),

    /// Audio stream setup or runtime error.
    #[error("Audio stream error: {0}")]
    Stream(String),

    /// No audio device available on the system.
    #[error("No audio device available")]
    NoDevice,

    /// The requested sample format is not supported.
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// The requested audio device was not found.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// A stream is already running on this I/O handle.
    #[error("Audio stream already running")]
    AlreadyRunning,

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for audio I/O operations.
pub type Result<T> = std::result::Result<T, Error>;
