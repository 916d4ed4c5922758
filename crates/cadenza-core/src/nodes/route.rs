//! Channel routing between buses.

use crate::error::RenderFault;
use crate::format::Format;
use crate::node::{FormatRule, Inputs, Outputs, Processor, RenderStatus};

/// Copies one input channel to one output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Route {
    /// Input bus to read.
    pub source_bus: usize,
    /// Channel within the input bus.
    pub source_channel: usize,
    /// Output bus to write.
    pub bus: usize,
    /// Channel within the output bus.
    pub channel: usize,
}

impl Route {
    /// Creates a route from `(source_bus, source_channel)` to `(bus, channel)`.
    pub fn new(source_bus: usize, source_channel: usize, bus: usize, channel: usize) -> Self {
        Self {
            source_bus,
            source_channel,
            bus,
            channel,
        }
    }
}

/// Routes individual channels from input buses to output buses.
///
/// Output channels with no route render silence. Routes whose source channel
/// does not exist in the arriving format are skipped. Several routes into the
/// same output channel are summed.
#[derive(Debug, Clone)]
pub struct RouteNode {
    inputs: usize,
    output_channels: Vec<u16>,
    routes: Vec<Route>,
}

impl RouteNode {
    /// Creates a router with `inputs` input buses and one output bus per entry
    /// of `output_channels`, each with that many channels.
    pub fn new(inputs: usize, output_channels: Vec<u16>) -> Self {
        Self {
            inputs: inputs.max(1),
            output_channels,
            routes: Vec::new(),
        }
    }

    /// Adds a route. Routes pointing at missing buses or output channels are ignored.
    pub fn with_route(mut self, route: Route) -> Self {
        let valid_output = self
            .output_channels
            .get(route.bus)
            .is_some_and(|&n| route.channel < n as usize);
        if route.source_bus < self.inputs && valid_output {
            self.routes.push(route);
        }
        self
    }

    /// Configured routes.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}

impl Processor for RouteNode {
    fn name(&self) -> &'static str {
        "route"
    }

    fn input_bus_count(&self) -> usize {
        self.inputs
    }

    fn output_bus_count(&self) -> usize {
        self.output_channels.len()
    }

    fn format_rule(&self) -> FormatRule {
        FormatRule::Channels(self.output_channels.clone())
    }

    fn prepare(&mut self, _format: &Format, _max_frames: usize) {}

    fn render(
        &mut self,
        inputs: &Inputs<'_>,
        outputs: &mut Outputs<'_>,
    ) -> Result<RenderStatus, RenderFault> {
        outputs.clear();
        for route in &self.routes {
            let Some(input) = inputs.get(route.source_bus) else {
                continue;
            };
            if route.source_channel >= input.channel_count() {
                continue;
            }
            let Some(mut out) = outputs.get_mut(route.bus) else {
                continue;
            };
            if route.channel >= out.channel_count() {
                continue;
            }
            for (o, &i) in out
                .channel_mut(route.channel)
                .iter_mut()
                .zip(input.channel(route.source_channel))
            {
                *o += i;
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

    #[test]
    fn test_swaps_and_splits_channels() {
        let stereo = Format::new(48_000.0, 2, SampleFormat::Float32).unwrap();
        let mono = stereo.with_channel_count(1).unwrap();
        let mut router = RouteNode::new(1, vec![2, 1])
            .with_route(Route::new(0, 0, 0, 1))
            .with_route(Route::new(0, 1, 0, 0))
            .with_route(Route::new(0, 1, 1, 0))
            .with_route(Route::new(0, 0, 1, 3));
        assert_eq!(router.routes().len(), 3);

        let mut pool = BufferPool::new(1, 2, 4);
        {
            let buf = pool.get_mut(0);
            buf.set_format(stereo).unwrap();
            let mut view = buf.frames(4).unwrap();
            view.channel_mut(0).fill(0.1);
            view.channel_mut(1).fill(0.2);
        }
        let slots = [Some(0)];
        let inputs = Inputs {
            pool: &pool,
            slots: &slots,
            frames: 4,
        };
        let mut out = [SampleBuffer::allocate(stereo, 4), SampleBuffer::allocate(mono, 4)];
        for buf in &mut out {
            buf.set_frame_length(4).unwrap();
        }
        let mut outputs = Outputs {
            buffers: &mut out,
            frames: 4,
        };
        router.render(&inputs, &mut outputs).unwrap();
        assert_eq!(out[0].channel(0), &[0.2; 4]);
        assert_eq!(out[0].channel(1), &[0.1; 4]);
        assert_eq!(out[1].channel(0), &[0.2; 4]);
    }
}
