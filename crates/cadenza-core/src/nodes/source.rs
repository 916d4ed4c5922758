//! Sequential playback of a decoded buffer.

use crate::buffer::SampleBuffer;
use crate::error::{self, RenderFault};
use crate::format::Format;
use crate::node::{FormatRule, Inputs, Outputs, Processor, RenderStatus};

/// Plays a fully decoded buffer from start to end, once.
///
/// Each render copies the next frames in order and pads a short final quantum
/// with silence. Once every frame has been delivered, the next render emits
/// silence and reports [`RenderStatus::EndOfStream`].
pub struct OfflineSource {
    data: SampleBuffer,
    position: usize,
}

impl OfflineSource {
    /// Wraps a decoded buffer. Its frame length is the stream length.
    pub fn new(data: SampleBuffer) -> Self {
        Self { data, position: 0 }
    }

    /// Builds a source from interleaved samples in `format`.
    pub fn from_interleaved(format: Format, samples: &[f32]) -> error::Result<Self> {
        let frames = samples.len() / format.channel_count();
        let mut data = SampleBuffer::allocate(format, frames);
        data.write_interleaved(samples)?;
        Ok(Self::new(data))
    }

    /// Builds a source of `frames` frames holding `value` on every channel.
    pub fn constant(format: Format, frames: usize, value: f32) -> Self {
        let mut data = SampleBuffer::allocate(format, frames);
        if let Ok(mut view) = data.frames(frames) {
            view.fill(value);
        }
        Self::new(data)
    }

    /// Format of the decoded audio.
    pub fn format(&self) -> &Format {
        self.data.format()
    }

    /// Total frames in the stream.
    pub fn len(&self) -> usize {
        self.data.frame_length()
    }

    /// Returns true if the stream holds no frames.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames not yet delivered.
    pub fn remaining(&self) -> usize {
        self.len() - self.position
    }
}

impl Processor for OfflineSource {
    fn name(&self) -> &'static str {
        "offline-source"
    }

    fn input_bus_count(&self) -> usize {
        0
    }

    fn format_rule(&self) -> FormatRule {
        FormatRule::Fixed(*self.data.format())
    }

    fn is_finite(&self) -> bool {
        true
    }

    fn prepare(&mut self, _format: &Format, _max_frames: usize) {}

    fn render(
        &mut self,
        _inputs: &Inputs<'_>,
        outputs: &mut Outputs<'_>,
    ) -> Result<RenderStatus, RenderFault> {
        let Some(mut out) = outputs.get_mut(0) else {
            return Ok(RenderStatus::Continue);
        };
        let remaining = self.remaining();
        if remaining == 0 {
            out.clear();
            return Ok(RenderStatus::EndOfStream);
        }
        let count = remaining.min(out.frames());
        let channels = out.channel_count().min(self.data.channel_count());
        for ch in 0..channels {
            let src = &self.data.channel(ch)[self.position..self.position + count];
            let dst = out.channel_mut(ch);
            dst[..count].copy_from_slice(src);
            dst[count..].fill(0.0);
        }
        for ch in channels..out.channel_count() {
            out.channel_mut(ch).fill(0.0);
        }
        self.position += count;
        Ok(RenderStatus::Continue)
    }

    fn reset(&mut self) {
        self.position = 0;
    }
}
