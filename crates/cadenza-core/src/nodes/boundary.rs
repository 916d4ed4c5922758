//! I/O boundary nodes: hardware input and the graph's output terminal.

use rtrb::{Consumer, Producer, RingBuffer};

use crate::error::RenderFault;
use crate::format::Format;
use crate::node::{FormatRule, Inputs, Outputs, Processor, RenderStatus};

/// Source node reading interleaved frames from a hardware input ring.
///
/// The ring is filled by the input side of an audio stream through the
/// paired [`InputFeed`]. When a quantum finds fewer frames than it needs, the
/// node consumes what is there, renders silence, and reports
/// [`RenderFault::Underrun`].
pub struct InputNode {
    format: Format,
    ring: Consumer<f32>,
}

/// Producer side of an [`InputNode`], owned by the hardware input callback.
pub struct InputFeed {
    ring: Producer<f32>,
    channels: usize,
}

impl InputNode {
    /// Creates an input node buffering up to `capacity_frames` frames of `format`.
    pub fn new(format: Format, capacity_frames: usize) -> (Self, InputFeed) {
        let channels = format.channel_count();
        let (tx, rx) = RingBuffer::new(capacity_frames.max(1) * channels);
        (
            Self { format, ring: rx },
            InputFeed { ring: tx, channels },
        )
    }

    /// Format delivered by the hardware.
    pub fn format(&self) -> &Format {
        &self.format
    }
}

impl InputFeed {
    /// Pushes whole interleaved frames, returning how many frames fit.
    pub fn push_interleaved(&mut self, samples: &[f32]) -> usize {
        let frames = (samples.len() / self.channels).min(self.ring.slots() / self.channels);
        for &sample in &samples[..frames * self.channels] {
            if self.ring.push(sample).is_err() {
                break;
            }
        }
        frames
    }

    /// Frames that can be pushed without overflowing.
    pub fn free_frames(&self) -> usize {
        self.ring.slots() / self.channels
    }
}

impl Processor for InputNode {
    fn name(&self) -> &'static str {
        "input"
    }

    fn input_bus_count(&self) -> usize {
        0
    }

    fn format_rule(&self) -> FormatRule {
        FormatRule::Fixed(self.format)
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
        let channels = self.format.channel_count();
        let wanted = out.frames() * channels;
        let available = self.ring.slots() / channels * channels;
        let Ok(chunk) = self.ring.read_chunk(wanted.min(available)) else {
            return Err(RenderFault::Underrun);
        };
        if chunk.len() < wanted {
            chunk.commit_all();
            return Err(RenderFault::Underrun);
        }
        let (first, second) = chunk.as_slices();
        let copy_channels = channels.min(out.channel_count());
        for ch in 0..copy_channels {
            let dst = out.channel_mut(ch);
            for (frame, sample) in dst.iter_mut().enumerate() {
                let idx = frame * channels + ch;
                *sample = if idx < first.len() {
                    first[idx]
                } else {
                    second[idx - first.len()]
                };
            }
        }
        chunk.commit_all();
        Ok(RenderStatus::Continue)
    }

    fn reset(&mut self) {}
}

/// Terminal node of a graph. Its single output bus holds the audio delivered
/// by each pull, already converted to the boundary format.
///
/// Every graph owns exactly one, created alongside the graph.
pub struct OutputNode {
    format: Format,
}

impl OutputNode {
    pub(crate) fn new(format: Format) -> Self {
        Self { format }
    }

    /// Format delivered to the hardware or offline sink.
    pub fn format(&self) -> &Format {
        &self.format
    }
}

impl Processor for OutputNode {
    fn name(&self) -> &'static str {
        "output"
    }

    fn format_rule(&self) -> FormatRule {
        FormatRule::Fixed(self.format)
    }

    fn prepare(&mut self, _format: &Format, _max_frames: usize) {}

    fn render(
        &mut self,
        inputs: &Inputs<'_>,
        outputs: &mut Outputs<'_>,
    ) -> Result<RenderStatus, RenderFault> {
        let Some(mut out) = outputs.get_mut(0) else {
            return Ok(RenderStatus::Continue);
        };
        match inputs.get(0) {
            Some(input) => {
                for ch in 0..out.channel_count().min(input.channel_count()) {
                    out.channel_mut(ch).copy_from_slice(input.channel(ch));
                }
            }
            None => out.clear(),
        }
        Ok(RenderStatus::Continue)
    }

    fn reset(&mut self) {}
}
