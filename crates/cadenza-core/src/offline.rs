//! Offline rendering: drive a [`Renderer`] as fast as possible into a sink.
//!
//! ```rust,ignore
//! let outcome = OfflineRender::new(&mut renderer)
//!     .quantum(512)
//!     .on_complete(|cancelled| println!("done, cancelled={cancelled}"))
//!     .run(&mut sink)?;
//! ```

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::buffer::{BufferView, SampleBuffer};
use crate::render::{Pulled, Renderer};

/// Destination for offline-rendered audio.
pub trait OfflineSink {
    /// Error raised by [`write`](Self::write).
    type Error;

    /// Consumes one rendered block in the output boundary format.
    fn write(&mut self, block: &BufferView<'_>) -> Result<(), Self::Error>;
}

/// Sink collecting interleaved samples in memory.
#[derive(Debug, Default, Clone)]
pub struct CollectSink {
    samples: Vec<f32>,
    channels: usize,
}

impl CollectSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interleaved samples written so far.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Frames written so far.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    /// Consumes the sink, returning its interleaved samples.
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

impl OfflineSink for CollectSink {
    type Error = Infallible;

    fn write(&mut self, block: &BufferView<'_>) -> Result<(), Infallible> {
        self.channels = block.channel_count();
        let start = self.samples.len();
        self.samples
            .resize(start + block.frames() * block.channel_count(), 0.0);
        block.copy_interleaved_to(&mut self.samples[start..]);
        Ok(())
    }
}

impl OfflineSink for SampleBuffer {
    type Error = crate::error::Error;

    /// Appends the block, growing the frame length.
    fn write(&mut self, block: &BufferView<'_>) -> Result<(), Self::Error> {
        let start = self.frame_length();
        self.set_frame_length(start + block.frames())?;
        let channels = self.channel_count().min(block.channel_count());
        for ch in 0..channels {
            self.channel_mut(ch)[start..].copy_from_slice(block.channel(ch));
        }
        Ok(())
    }
}

/// Shared flag stopping an offline render between quanta.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Why an offline render stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Every finite source ended.
    Finished,
    /// The frame limit was reached first.
    LimitReached,
    /// Cancelled through the token, or the sink failed.
    Cancelled,
}

/// Summary of a finished offline render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfflineOutcome {
    /// Frames delivered to the sink.
    pub frames: u64,
    /// Why rendering stopped.
    pub completion: Completion,
}

/// Builder running a renderer to completion.
pub struct OfflineRender<'a> {
    renderer: &'a mut Renderer,
    quantum: usize,
    limit: Option<u64>,
    cancel: Option<CancelToken>,
    on_complete: Option<Box<dyn FnOnce(bool) + 'a>>,
}

impl<'a> OfflineRender<'a> {
    /// Renders in quanta of the renderer's maximum size by default.
    pub fn new(renderer: &'a mut Renderer) -> Self {
        let quantum = renderer.max_frames();
        Self {
            renderer,
            quantum,
            limit: None,
            cancel: None,
            on_complete: None,
        }
    }

    /// Frames per pull, clamped to `1..=max_frames`.
    pub fn quantum(mut self, frames: usize) -> Self {
        self.quantum = frames.clamp(1, self.renderer.max_frames());
        self
    }

    /// Stops after `frames` frames even if sources keep going.
    ///
    /// Required for graphs without finite sources, which never end on their own.
    pub fn limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    /// Checks `token` before every quantum.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Called exactly once when rendering stops, with `true` if it was cancelled.
    pub fn on_complete(mut self, callback: impl FnOnce(bool) + 'a) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// Pulls until end of stream, the limit, or cancellation.
    ///
    /// A sink error stops rendering, invokes the completion callback with
    /// `cancelled = true`, and is returned.
    pub fn run<S: OfflineSink>(self, sink: &mut S) -> Result<OfflineOutcome, S::Error> {
        let Self {
            renderer,
            quantum,
            limit,
            cancel,
            on_complete,
        } = self;
        let mut frames = 0u64;
        let result = loop {
            if cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                break Ok(Completion::Cancelled);
            }
            let wanted = match limit {
                Some(limit) if frames >= limit => break Ok(Completion::LimitReached),
                Some(limit) => quantum.min((limit - frames) as usize),
                None => quantum,
            };
            // `wanted` never exceeds max_frames, so pull cannot fail.
            let Ok(pulled) = renderer.pull(wanted) else {
                break Ok(Completion::Cancelled);
            };
            match pulled {
                Pulled::EndOfStream => break Ok(Completion::Finished),
                Pulled::Frames(block) => {
                    if let Err(e) = sink.write(&block) {
                        break Err(e);
                    }
                    frames += block.frames() as u64;
                }
            }
        };

        if let Some(callback) = on_complete {
            callback(!matches!(result, Ok(Completion::Finished | Completion::LimitReached)));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("offline_render: {frames} frames, {:?}", result.as_ref().ok());

        result.map(|completion| OfflineOutcome { frames, completion })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::format::{Format, SampleFormat};
    use crate::graph::Graph;
    use crate::nodes::{MixerNode, OfflineSource};
    use std::cell::Cell;

    fn mono() -> Format {
        Format::new(48_000.0, 1, SampleFormat::Float32).unwrap()
    }

    fn graph_with_source(frames: usize) -> (Graph, Renderer) {
        let config = EngineConfig::with_format(mono()).with_max_frames(64);
        let (mut graph, renderer) = Graph::new(config).unwrap();
        let src = graph.add_node(OfflineSource::constant(mono(), frames, 0.5)).unwrap();
        graph.connect(src, 0, graph.output(), 0).unwrap();
        graph.commit().unwrap();
        (graph, renderer)
    }

    #[test]
    fn test_runs_to_end_of_stream() {
        let (_graph, mut renderer) = graph_with_source(150);
        let calls = Cell::new(0);
        let mut sink = CollectSink::new();
        let outcome = OfflineRender::new(&mut renderer)
            .quantum(50)
            .on_complete(|cancelled| {
                assert!(!cancelled);
                calls.set(calls.get() + 1);
            })
            .run(&mut sink)
            .unwrap();
        assert_eq!(outcome.completion, Completion::Finished);
        assert_eq!(outcome.frames, 150);
        assert_eq!(sink.frames(), 150);
        assert!(sink.samples().iter().all(|&s| s == 0.5));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_limit_stops_endless_graph() {
        let config = EngineConfig::with_format(mono()).with_max_frames(64);
        let (mut graph, mut renderer) = Graph::new(config).unwrap();
        let mix = graph.add_node(MixerNode::new(1)).unwrap();
        graph.connect(mix, 0, graph.output(), 0).unwrap();
        graph.commit().unwrap();
        let outcome = OfflineRender::new(&mut renderer)
            .limit(100)
            .run(&mut CollectSink::new())
            .unwrap();
        assert_eq!(outcome.completion, Completion::LimitReached);
        assert_eq!(outcome.frames, 100);
    }

    #[test]
    fn test_cancel_before_start() {
        let (_graph, mut renderer) = graph_with_source(1000);
        let token = CancelToken::new();
        token.cancel();
        let cancelled = Cell::new(None);
        let outcome = OfflineRender::new(&mut renderer)
            .cancel_token(token)
            .on_complete(|c| cancelled.set(Some(c)))
            .run(&mut CollectSink::new())
            .unwrap();
        assert_eq!(outcome.completion, Completion::Cancelled);
        assert_eq!(outcome.frames, 0);
        assert_eq!(cancelled.get(), Some(true));
    }

    #[test]
    fn test_buffer_sink_grows_until_capacity() {
        let (_graph, mut renderer) = graph_with_source(100);
        let mut sink = SampleBuffer::allocate(mono(), 80);
        let cancelled = Cell::new(false);
        let result = OfflineRender::new(&mut renderer)
            .quantum(40)
            .on_complete(|c| cancelled.set(c))
            .run(&mut sink);
        assert!(result.is_err());
        assert!(cancelled.get());
        assert_eq!(sink.frame_length(), 80);
    }
}
