//! Render-thread half of the engine.
//!
//! [`Renderer`] owns the node kernels and the snapshot being played. Every
//! pull renders one quantum: it adopts any staged snapshots, runs each
//! scheduled node in order, and hands back the output boundary's buffer.
//! Nothing here allocates, frees, locks, or blocks.

use rtrb::{Consumer, Producer};

use crate::buffer::{BufferView, SampleBuffer};
use crate::config::EngineConfig;
use crate::converter::source_frames_for;
use crate::error::{Error, RenderFault, Result};
use crate::event::RenderEvent;
use crate::format::Format;
use crate::node::{Inputs, NodeKind, Outputs, RenderStatus};
use crate::snapshot::Snapshot;
use crate::sync::{Receiver, Transition};

/// Result of a [`Renderer::pull`].
#[derive(Debug, Clone, Copy)]
pub enum Pulled<'a> {
    /// Rendered audio in the output boundary format.
    Frames(BufferView<'a>),
    /// Every finite source has ended. Nothing was delivered.
    EndOfStream,
}

/// Renders a committed graph on the audio thread.
///
/// Created together with its [`Graph`](crate::graph::Graph). Move it to the
/// thread that drives audio (a hardware callback or an offline loop) and call
/// [`pull`](Self::pull) once per quantum.
pub struct Renderer {
    format: Format,
    max_frames: usize,
    receiver: Receiver,
    events: Producer<RenderEvent>,
    /// Arena slots to reset before the next adoption.
    resets: Consumer<usize>,
    /// Node kernels indexed by arena slot.
    arena: Vec<Option<NodeKind>>,
    current: Option<Box<Snapshot>>,
    /// Delivered before the first commit and when no output is scheduled.
    silence: SampleBuffer,
    /// Render frames delivered so far.
    position: u64,
    /// End of stream already reported for the current snapshot.
    ended: bool,
}

impl Renderer {
    pub(crate) fn new(
        config: &EngineConfig,
        receiver: Receiver,
        events: Producer<RenderEvent>,
        resets: Consumer<usize>,
    ) -> Self {
        let mut silence = SampleBuffer::allocate(config.format, config.max_frames);
        // Capacity equals max_frames, so this cannot fail.
        let _ = silence.set_frame_length(config.max_frames);
        Self {
            format: config.format,
            max_frames: config.max_frames,
            receiver,
            events,
            resets,
            arena: (0..config.max_nodes).map(|_| None).collect(),
            current: None,
            silence,
            position: 0,
            ended: false,
        }
    }

    /// Format of every pulled buffer.
    pub fn format(&self) -> &Format {
        &self.format
    }

    /// Largest quantum a single pull may request.
    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    /// Render frames delivered since creation.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Version of the snapshot being rendered, `None` before the first adoption.
    pub fn snapshot_version(&self) -> Option<u64> {
        self.current.as_ref().map(|s| s.version)
    }

    /// Renders one quantum of `frames` frames.
    ///
    /// Adopts pending snapshots first, so a commit made before this call is
    /// heard in full from the first frame. Fails with
    /// [`Error::CapacityExceeded`] if `frames` exceeds the maximum quantum;
    /// use [`render_interleaved`](Self::render_interleaved) for larger requests.
    pub fn pull(&mut self, frames: usize) -> Result<Pulled<'_>> {
        if frames > self.max_frames {
            return Err(Error::CapacityExceeded {
                requested: frames,
                capacity: self.max_frames,
            });
        }
        if self.render_quantum(frames, true) {
            return Ok(Pulled::EndOfStream);
        }
        Ok(Pulled::Frames(self.output_view(frames)))
    }

    /// Fills `out` with interleaved frames, however many quanta it takes.
    ///
    /// Requests larger than the maximum quantum are split into consecutive
    /// sub-quanta. Snapshots are adopted only before the first, so the whole
    /// request plays a single topology. Frames past the end of stream are
    /// silent, as is any trailing partial frame.
    pub fn render_interleaved(&mut self, out: &mut [f32]) -> RenderStatus {
        let channels = self.format.channel_count();
        let total = out.len() / channels;
        let mut status = RenderStatus::Continue;
        let mut done = 0;
        let mut adopt = true;
        while done < total {
            let frames = (total - done).min(self.max_frames);
            let chunk = &mut out[done * channels..(done + frames) * channels];
            if self.render_quantum(frames, adopt) {
                chunk.fill(0.0);
                status = RenderStatus::EndOfStream;
            } else {
                self.output_view(frames).copy_interleaved_to(chunk);
            }
            adopt = false;
            done += frames;
        }
        out[total * channels..].fill(0.0);
        status
    }

    fn output_view(&self, frames: usize) -> BufferView<'_> {
        let rendered = self
            .current
            .as_deref()
            .and_then(|s| s.output_slot.map(|slot| s.pool.get(slot).view()));
        rendered.unwrap_or_else(|| self.silence.view()).truncated(frames)
    }

    /// Renders one quantum. Returns true when the stream has ended.
    fn render_quantum(&mut self, frames: usize, adopt: bool) -> bool {
        self.receiver.begin_quantum();
        if adopt {
            self.adopt();
        }
        let ended = match self.current.as_deref_mut() {
            Some(snapshot) => run_steps(
                snapshot,
                &mut self.arena,
                &mut self.events,
                &self.receiver,
                self.position,
                frames,
            ),
            None => false,
        };
        if ended && !self.ended {
            self.ended = true;
            if let Some(version) = self.snapshot_version() {
                emit(&mut self.events, &self.receiver, RenderEvent::EndOfStream { version });
            }
        }
        if !ended {
            self.position += frames as u64;
        }
        self.receiver.end_quantum();
        ended
    }

    /// Applies pending node resets, then swaps in every staged snapshot,
    /// oldest first. A reset queued before a removal reaches the node before
    /// its slot is evicted.
    fn adopt(&mut self) {
        while let Ok(slot) = self.resets.pop() {
            if let Some(kernel) = self.arena.get_mut(slot).and_then(Option::as_mut) {
                kernel.processor_mut().reset();
                self.ended = false;
            }
        }
        while let Some(mut transition) = self.receiver.next_staged() {
            let Transition {
                install,
                storage,
                evict,
                evicted,
                ..
            } = &mut *transition;
            for &slot in evict.iter() {
                if let Some(kernel) = self.arena[slot].take() {
                    evicted.push(kernel);
                }
            }
            for (slot, kernel) in install.drain(..) {
                debug_assert!(self.arena[slot].is_none(), "arena slot {slot} still occupied");
                self.arena[slot] = Some(kernel);
            }
            for (slot, state) in storage.iter_mut() {
                if let Some(kernel) = self.arena[*slot].as_mut() {
                    kernel.processor_mut().adopt_storage(state);
                }
            }
            core::mem::swap(&mut self.current, &mut transition.snapshot);
            let version = transition.version;
            self.receiver.retire(transition);
            self.ended = false;

            #[cfg(feature = "tracing")]
            tracing::trace!("render_adopt: version {version}");

            emit(&mut self.events, &self.receiver, RenderEvent::Adopted { version });
        }
    }
}

fn emit(events: &mut Producer<RenderEvent>, receiver: &Receiver, event: RenderEvent) {
    if events.push(event).is_err() {
        receiver.drop_event();
    }
}

/// Runs every step of `snapshot`. Returns true when every finite source ended.
fn run_steps(
    snapshot: &mut Snapshot,
    arena: &mut [Option<NodeKind>],
    events: &mut Producer<RenderEvent>,
    receiver: &Receiver,
    position: u64,
    frames: usize,
) -> bool {
    let Snapshot {
        steps,
        pool,
        converters,
        scratch,
        finite_sources,
        ..
    } = snapshot;
    let mut ended = 0;

    for (idx, step) in steps.iter().enumerate() {
        let step_frames = step
            .step_ratio
            .map_or(frames, |ratio| source_frames_for(ratio, position, frames));
        let mut fault = None;

        for conv in &step.conversions {
            debug_assert!(conv.source_step < idx, "conversion reads a later step");
            let (source, target) = pool.get_ref_and_mut(conv.source, conv.target);
            if converters[conv.converter]
                .render(&source.view(), target, position, step_frames)
                .is_err()
            {
                fault = Some(RenderFault::CapacityExceeded);
            }
        }
        debug_assert!(
            step.input_steps.iter().flatten().all(|&s| s < idx),
            "{} reads a later step",
            step.node
        );

        for (bus, &slot) in step.outputs.iter().enumerate() {
            let mut buffer = pool.take(slot);
            if buffer.set_format(step.output_formats[bus]).is_err()
                || buffer.set_frame_length(step_frames).is_err()
            {
                fault = Some(RenderFault::CapacityExceeded);
            }
            scratch.push(buffer);
        }

        let status = match (fault, arena.get_mut(step.slot).and_then(Option::as_mut)) {
            (Some(fault), _) => Err(fault),
            (None, Some(kernel)) => {
                let inputs = Inputs {
                    pool: &*pool,
                    slots: &step.inputs,
                    frames: step_frames,
                };
                let mut outputs = Outputs {
                    buffers: scratch.as_mut_slice(),
                    frames: step_frames,
                };
                kernel.processor_mut().render(&inputs, &mut outputs)
            }
            (None, None) => Err(RenderFault::MissingKernel),
        };

        match status {
            Ok(RenderStatus::Continue) => {}
            Ok(RenderStatus::EndOfStream) => {
                if step.finite {
                    ended += 1;
                }
            }
            Err(fault) => {
                for buffer in scratch.iter_mut() {
                    buffer.view_mut().clear();
                }
                emit(events, receiver, RenderEvent::Fault { node: step.node, fault });
            }
        }

        for &slot in step.outputs.iter().rev() {
            if let Some(buffer) = scratch.pop() {
                pool.restore(slot, buffer);
            }
        }
    }

    *finite_sources > 0 && ended >= *finite_sources
}
