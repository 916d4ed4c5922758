//! Hardware streaming for a graph's I/O boundaries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use cadenza_core::{InputFeed, RenderStatus, Renderer};

use crate::backend::{AudioBackend, BackendStreamConfig, StreamHandle};
use crate::{Error, Result};

/// Drives a [`Renderer`] from a device output callback.
///
/// The renderer is moved into the callback and pulled once per device buffer;
/// graph edits keep flowing through the [`Graph`](cadenza_core::Graph) on the
/// control thread. An optional input stream feeds an
/// [`InputNode`](cadenza_core::InputNode) through its [`InputFeed`].
pub struct AudioIo {
    backend: Box<dyn AudioBackend>,
    output: Option<StreamHandle>,
    input: Option<StreamHandle>,
    running: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    dropped_input: Arc<AtomicU64>,
}

impl AudioIo {
    /// Creates an idle I/O handle on `backend`.
    pub fn new(backend: Box<dyn AudioBackend>) -> Self {
        Self {
            backend,
            output: None,
            input: None,
            running: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
            dropped_input: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The backend streams are built on.
    pub fn backend(&self) -> &dyn AudioBackend {
        self.backend.as_ref()
    }

    /// Starts the output stream, moving `renderer` into its callback.
    ///
    /// The stream's channel count and rate must match the renderer's output
    /// format.
    pub fn start(&mut self, mut renderer: Renderer, config: &BackendStreamConfig) -> Result<()> {
        if self.output.is_some() {
            return Err(Error::AlreadyRunning);
        }
        let format = *renderer.format();
        let actual_rate = self.backend.actual_sample_rate(config);
        if usize::from(config.channels) != format.channel_count()
            || f64::from(actual_rate) != format.sample_rate()
        {
            return Err(Error::UnsupportedFormat(format!(
                "device stream {} ch @ {} Hz for a {format} graph",
                config.channels, actual_rate
            )));
        }

        self.running.store(true, Ordering::SeqCst);
        self.finished.store(false, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let finished = Arc::clone(&self.finished);
        let handle = self.backend.build_output_stream(
            config,
            Box::new(move |data: &mut [f32]| {
                if !running.load(Ordering::Relaxed) {
                    data.fill(0.0);
                    return;
                }
                if renderer.render_interleaved(data) == RenderStatus::EndOfStream {
                    finished.store(true, Ordering::Release);
                }
            }),
            Box::new(|err: &str| tracing::error!(error = err, "output stream error")),
        );
        let handle = match handle {
            Ok(handle) => handle,
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };

        tracing::info!(
            backend = self.backend.name(),
            %format,
            buffer_size = config.buffer_size,
            "audio output running"
        );
        self.output = Some(handle);
        Ok(())
    }

    /// Starts an input stream pushing captured frames into `feed`.
    ///
    /// Frames that do not fit in the feed's ring are dropped and counted.
    pub fn start_input(&mut self, mut feed: InputFeed, config: &BackendStreamConfig) -> Result<()> {
        if self.input.is_some() {
            return Err(Error::AlreadyRunning);
        }
        let channels = usize::from(config.channels.max(1));
        let dropped = Arc::clone(&self.dropped_input);
        let handle = self.backend.build_input_stream(
            config,
            Box::new(move |data: &[f32]| {
                let offered = data.len() / channels;
                let accepted = feed.push_interleaved(data);
                if accepted < offered {
                    dropped.fetch_add((offered - accepted) as u64, Ordering::Relaxed);
                }
            }),
            Box::new(|err: &str| tracing::error!(error = err, "input stream error")),
        )?;
        tracing::info!(channels = config.channels, "audio input running");
        self.input = Some(handle);
        Ok(())
    }

    /// Stops and releases both streams. The renderer is dropped with its stream.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let released = self.output.take().is_some() | self.input.take().is_some();
        if released {
            tracing::info!("audio streams stopped");
        }
    }

    /// Whether an output stream is active.
    pub fn is_running(&self) -> bool {
        self.output.is_some() && self.running.load(Ordering::SeqCst)
    }

    /// Whether the renderer has reported end of stream.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Captured frames dropped because the input ring was full.
    pub fn dropped_input_frames(&self) -> u64 {
        self.dropped_input.load(Ordering::Relaxed)
    }
}

impl Drop for AudioIo {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for AudioIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioIo")
            .field("backend", &self.backend.name())
            .field("running", &self.is_running())
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}
