//! Gain-weighted summing node.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::RenderFault;
use crate::format::Format;
use crate::node::{FormatRule, Inputs, Outputs, Processor, RenderStatus};

/// Shared per-input gains of a [`MixerNode`].
///
/// Gains are stored as `f32` bits in atomics: the control thread writes, the
/// render thread reads once per quantum. Changing a gain never needs a commit.
#[derive(Clone, Debug)]
pub struct MixerControl {
    gains: Arc<[AtomicU32]>,
}

impl MixerControl {
    fn new(inputs: usize) -> Self {
        let gains = (0..inputs).map(|_| AtomicU32::new(1.0f32.to_bits())).collect();
        Self { gains }
    }

    /// Number of inputs.
    pub fn len(&self) -> usize {
        self.gains.len()
    }

    /// Returns true if the mixer has no inputs.
    pub fn is_empty(&self) -> bool {
        self.gains.is_empty()
    }

    /// Linear gain of input `bus`. Out-of-range buses read as 0.
    #[inline]
    pub fn gain(&self, bus: usize) -> f32 {
        self.gains
            .get(bus)
            .map_or(0.0, |g| f32::from_bits(g.load(Ordering::Relaxed)))
    }

    /// Sets the linear gain of input `bus`. Out-of-range buses are ignored.
    pub fn set_gain(&self, bus: usize, gain: f32) {
        if let Some(g) = self.gains.get(bus) {
            g.store(gain.to_bits(), Ordering::Relaxed);
        }
    }
}

/// Sums N inputs after applying an independent gain to each, then clamps the
/// result to the valid range of the output format.
///
/// Without an explicit format the mixer follows its lowest connected input;
/// every other input is converted to that format on its connection.
pub struct MixerNode {
    format: Option<Format>,
    control: MixerControl,
}

impl MixerNode {
    /// Creates a mixer with `inputs` input buses at unity gain.
    pub fn new(inputs: usize) -> Self {
        Self {
            format: None,
            control: MixerControl::new(inputs.max(1)),
        }
    }

    /// Pins the output format instead of following the first input.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    /// Sets the initial gain of one input.
    pub fn with_gain(self, bus: usize, gain: f32) -> Self {
        self.control.set_gain(bus, gain);
        self
    }

    /// Handle for changing gains while the graph is running.
    pub fn control(&self) -> MixerControl {
        self.control.clone()
    }
}

impl Processor for MixerNode {
    fn name(&self) -> &'static str {
        "mixer"
    }

    fn input_bus_count(&self) -> usize {
        self.control.len()
    }

    fn format_rule(&self) -> FormatRule {
        self.format.map_or(FormatRule::Follow, FormatRule::Fixed)
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
        let sample_format = out.format().sample_format();
        out.clear();
        for (bus, input) in inputs.connected() {
            let gain = self.control.gain(bus);
            let channels = input.channel_count().min(out.channel_count());
            for ch in 0..channels {
                for (o, &i) in out.channel_mut(ch).iter_mut().zip(input.channel(ch)) {
                    *o += gain * i;
                }
            }
        }
        for channel in out.channels_mut() {
            for sample in channel {
                *sample = sample_format.clamp(*sample);
            }
        }
        Ok(RenderStatus::Continue)
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferPool, SampleBuffer};
    use crate::format::SampleFormat;

    fn render_constants(mixer: &mut MixerNode, values: &[f32], sf: SampleFormat) -> Vec<f32> {
        let format = Format::new(48_000.0, 2, sf).unwrap();
        let mut pool = BufferPool::new(values.len(), 2, 8);
        for (i, &v) in values.iter().enumerate() {
            let buf = pool.get_mut(i);
            buf.set_format(format).unwrap();
            buf.frames(8).unwrap().fill(v);
        }
        let slots: Vec<Option<usize>> = (0..values.len()).map(Some).collect();
        let inputs = Inputs {
            pool: &pool,
            slots: &slots,
            frames: 8,
        };
        let mut out = [SampleBuffer::allocate(format, 8)];
        out[0].set_frame_length(8).unwrap();
        let mut outputs = Outputs {
            buffers: &mut out,
            frames: 8,
        };
        assert_eq!(mixer.render(&inputs, &mut outputs), Ok(RenderStatus::Continue));
        out[0].channel(1).to_vec()
    }

    #[test]
    fn test_weighted_sum() {
        let mut mixer = MixerNode::new(2).with_gain(0, 0.5).with_gain(1, 0.25);
        let out = render_constants(&mut mixer, &[0.4, 0.8], SampleFormat::Float32);
        assert!(out.iter().all(|&s| (s - 0.4).abs() < 1e-6));
    }

    #[test]
    fn test_clamps_to_format_range() {
        let mut mixer = MixerNode::new(1).with_gain(0, 2.0);
        let out = render_constants(&mut mixer, &[0.5], SampleFormat::Float32);
        assert!(out.iter().all(|&s| s == 1.0));

        let mut mixer = MixerNode::new(1).with_gain(0, -3.0);
        let out = render_constants(&mut mixer, &[0.5], SampleFormat::Int16);
        assert!(out.iter().all(|&s| s == -1.0));

        let mut mixer = MixerNode::new(1).with_gain(0, 3.0);
        let out = render_constants(&mut mixer, &[0.5], SampleFormat::Int16);
        assert!(out.iter().all(|&s| s == SampleFormat::Int16.max_value()));
    }

    #[test]
    fn test_control_updates_gain() {
        let mut mixer = MixerNode::new(1);
        let control = mixer.control();
        control.set_gain(0, 0.0);
        let out = render_constants(&mut mixer, &[0.7], SampleFormat::Float32);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(control.gain(5), 0.0);
    }
}
