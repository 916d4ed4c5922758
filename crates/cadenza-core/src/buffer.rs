//! Fixed-capacity sample buffers and the render-side buffer pool.
//!
//! A [`SampleBuffer`] owns one contiguous allocation holding every channel
//! back to back (planar). Capacity in channels and frames is fixed when the
//! buffer is allocated; render-path operations only move the frame length and
//! format tag within that capacity.
//!
//! The [`BufferPool`] holds the buffers one snapshot renders through. Slots are
//! assigned at commit time by liveness analysis, so the pool holds only as many
//! buffers as are simultaneously live, not one per connection.

use crate::error::{Error, Result};
use crate::format::Format;

/// Pre-allocated multi-channel `f32` buffer with an explicit frame length.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    data: Vec<f32>,
    format: Format,
    channel_capacity: usize,
    frame_capacity: usize,
    frame_length: usize,
}

impl SampleBuffer {
    /// Allocates a zeroed buffer for `format` holding up to `max_frames` frames.
    pub fn allocate(format: Format, max_frames: usize) -> Self {
        Self::with_channel_capacity(format, format.channel_count(), max_frames)
    }

    /// Allocates a zeroed buffer able to hold `channel_capacity` channels, so it
    /// can later be re-tagged with wider formats via [`set_format`](Self::set_format).
    pub fn with_channel_capacity(format: Format, channel_capacity: usize, max_frames: usize) -> Self {
        let channel_capacity = channel_capacity.max(format.channel_count());
        Self {
            data: vec![0.0; channel_capacity * max_frames],
            format,
            channel_capacity,
            frame_capacity: max_frames,
            frame_length: 0,
        }
    }

    /// Format tag of the buffer contents.
    #[inline]
    pub fn format(&self) -> &Format {
        &self.format
    }

    /// Number of channels in the current format.
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.format.channel_count()
    }

    /// Maximum channel count this allocation can be tagged with.
    #[inline]
    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    /// Maximum number of frames.
    #[inline]
    pub fn frame_capacity(&self) -> usize {
        self.frame_capacity
    }

    /// Number of valid frames.
    #[inline]
    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    /// Sets the number of valid frames.
    pub fn set_frame_length(&mut self, frames: usize) -> Result<()> {
        if frames > self.frame_capacity {
            return Err(Error::CapacityExceeded {
                requested: frames,
                capacity: self.frame_capacity,
            });
        }
        self.frame_length = frames;
        Ok(())
    }

    /// Re-tags the buffer with another format of at most `channel_capacity` channels.
    pub fn set_format(&mut self, format: Format) -> Result<()> {
        if format.channel_count() > self.channel_capacity {
            return Err(Error::CapacityExceeded {
                requested: format.channel_count(),
                capacity: self.channel_capacity,
            });
        }
        self.format = format;
        Ok(())
    }

    /// Sets the frame length to `count` and returns a writable view over it.
    pub fn frames(&mut self, count: usize) -> Result<BufferViewMut<'_>> {
        self.set_frame_length(count)?;
        Ok(self.view_mut())
    }

    /// Read-only view of the valid frames.
    #[inline]
    pub fn view(&self) -> BufferView<'_> {
        BufferView {
            data: &self.data,
            stride: self.frame_capacity,
            channels: self.format.channel_count(),
            frames: self.frame_length,
            format: self.format,
        }
    }

    /// Writable view of the valid frames.
    #[inline]
    pub fn view_mut(&mut self) -> BufferViewMut<'_> {
        BufferViewMut {
            data: &mut self.data,
            stride: self.frame_capacity,
            channels: self.format.channel_count(),
            frames: self.frame_length,
            format: self.format,
        }
    }

    /// Valid frames of one channel.
    ///
    /// # Panics
    ///
    /// Panics if `channel >= channel_count()`.
    #[inline]
    pub fn channel(&self, channel: usize) -> &[f32] {
        assert!(channel < self.channel_count());
        let start = channel * self.frame_capacity;
        &self.data[start..start + self.frame_length]
    }

    /// Valid frames of one channel, mutably.
    ///
    /// # Panics
    ///
    /// Panics if `channel >= channel_count()`.
    #[inline]
    pub fn channel_mut(&mut self, channel: usize) -> &mut [f32] {
        assert!(channel < self.channel_count());
        let start = channel * self.frame_capacity;
        &mut self.data[start..start + self.frame_length]
    }

    /// Zeroes the whole allocation. The frame length is kept.
    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    /// Copies `source` into this buffer, taking its frame length.
    ///
    /// Channel counts must agree; the format tag is left unchanged.
    pub fn copy_from(&mut self, source: &BufferView<'_>) -> Result<()> {
        if source.channel_count() != self.channel_count() {
            return Err(Error::UnsupportedFormat(format!(
                "cannot copy {} channels into {}",
                source.channel_count(),
                self.channel_count()
            )));
        }
        let mut dst = self.frames(source.frames())?;
        for ch in 0..source.channel_count() {
            dst.channel_mut(ch).copy_from_slice(source.channel(ch));
        }
        Ok(())
    }

    /// Deinterleaves `samples` into the buffer, setting the frame length.
    ///
    /// Trailing samples that do not form a whole frame are ignored.
    /// Returns the number of frames written.
    pub fn write_interleaved(&mut self, samples: &[f32]) -> Result<usize> {
        let channels = self.channel_count();
        let frames = samples.len() / channels;
        let mut view = self.frames(frames)?;
        for ch in 0..channels {
            let dst = view.channel_mut(ch);
            for (frame, sample) in dst.iter_mut().enumerate() {
                *sample = samples[frame * channels + ch];
            }
        }
        Ok(frames)
    }
}

impl Default for SampleBuffer {
    /// An empty buffer with zero capacity. Does not allocate.
    fn default() -> Self {
        Self {
            data: Vec::new(),
            format: Format::default(),
            channel_capacity: 0,
            frame_capacity: 0,
            frame_length: 0,
        }
    }
}

/// Borrowed read-only view over a [`SampleBuffer`]'s valid frames.
#[derive(Clone, Copy, Debug)]
pub struct BufferView<'a> {
    data: &'a [f32],
    stride: usize,
    channels: usize,
    frames: usize,
    format: Format,
}

impl<'a> BufferView<'a> {
    /// Format of the viewed audio.
    #[inline]
    pub fn format(&self) -> &Format {
        &self.format
    }

    /// Number of frames.
    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of channels.
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels
    }

    /// Returns true when the view holds no frames.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Samples of one channel.
    #[inline]
    pub fn channel(&self, channel: usize) -> &'a [f32] {
        assert!(channel < self.channels);
        let start = channel * self.stride;
        &self.data[start..start + self.frames]
    }

    /// Iterates the channels in order.
    pub fn channels(&self) -> impl Iterator<Item = &'a [f32]> + '_ {
        (0..self.channels).map(|ch| self.channel(ch))
    }

    /// Returns a view of at most the first `frames` frames.
    pub fn truncated(&self, frames: usize) -> BufferView<'a> {
        BufferView {
            frames: frames.min(self.frames),
            ..*self
        }
    }

    /// Writes frames interleaved into `out`, returning the number of frames written.
    pub fn copy_interleaved_to(&self, out: &mut [f32]) -> usize {
        let frames = (out.len() / self.channels.max(1)).min(self.frames);
        for ch in 0..self.channels {
            let src = self.channel(ch);
            for frame in 0..frames {
                out[frame * self.channels + ch] = src[frame];
            }
        }
        frames
    }
}

/// Borrowed writable view over a [`SampleBuffer`]'s valid frames.
#[derive(Debug)]
pub struct BufferViewMut<'a> {
    data: &'a mut [f32],
    stride: usize,
    channels: usize,
    frames: usize,
    format: Format,
}

impl BufferViewMut<'_> {
    /// Format of the viewed audio.
    #[inline]
    pub fn format(&self) -> &Format {
        &self.format
    }

    /// Number of frames.
    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of channels.
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels
    }

    /// Samples of one channel.
    #[inline]
    pub fn channel(&self, channel: usize) -> &[f32] {
        assert!(channel < self.channels);
        let start = channel * self.stride;
        &self.data[start..start + self.frames]
    }

    /// Samples of one channel, mutably.
    #[inline]
    pub fn channel_mut(&mut self, channel: usize) -> &mut [f32] {
        assert!(channel < self.channels);
        let start = channel * self.stride;
        &mut self.data[start..start + self.frames]
    }

    /// Iterates the channels mutably.
    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut [f32]> + '_ {
        let frames = self.frames;
        self.data
            .chunks_mut(self.stride.max(1))
            .take(self.channels)
            .map(move |chunk| &mut chunk[..frames])
    }

    /// Sets every sample to `value`.
    pub fn fill(&mut self, value: f32) {
        for channel in self.channels_mut() {
            channel.fill(value);
        }
    }

    /// Sets every sample to zero.
    pub fn clear(&mut self) {
        self.fill(0.0);
    }
}

/// Pool of reusable sample buffers for one snapshot.
///
/// All slots share one channel and frame capacity, sized at commit for the
/// widest format and longest rate-converted quantum the snapshot needs.
#[derive(Debug, Default)]
pub struct BufferPool {
    buffers: Vec<SampleBuffer>,
}

impl BufferPool {
    /// Creates `count` slots, each able to hold `channels` x `frames`.
    pub fn new(count: usize, channels: usize, frames: usize) -> Self {
        let format = Format::default();
        let buffers = (0..count)
            .map(|_| SampleBuffer::with_channel_capacity(format, channels, frames))
            .collect();
        Self { buffers }
    }

    /// Returns the number of slots.
    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    /// Returns the buffer in slot `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= count()`.
    #[inline]
    pub fn get(&self, idx: usize) -> &SampleBuffer {
        &self.buffers[idx]
    }

    /// Returns the buffer in slot `idx` mutably.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= count()`.
    #[inline]
    pub fn get_mut(&mut self, idx: usize) -> &mut SampleBuffer {
        &mut self.buffers[idx]
    }

    /// Borrows one slot immutably and another mutably.
    ///
    /// # Panics
    ///
    /// Panics if `read == write` or either index is out of range.
    #[inline]
    pub fn get_ref_and_mut(&mut self, read: usize, write: usize) -> (&SampleBuffer, &mut SampleBuffer) {
        assert_ne!(read, write, "cannot alias buffer slot {read}");
        if read < write {
            let (lo, hi) = self.buffers.split_at_mut(write);
            (&lo[read], &mut hi[0])
        } else {
            let (lo, hi) = self.buffers.split_at_mut(read);
            (&hi[0], &mut lo[write])
        }
    }

    /// Moves the buffer out of slot `idx`, leaving an empty one behind.
    #[inline]
    pub(crate) fn take(&mut self, idx: usize) -> SampleBuffer {
        core::mem::take(&mut self.buffers[idx])
    }

    /// Puts a buffer back into slot `idx`.
    #[inline]
    pub(crate) fn restore(&mut self, idx: usize, buffer: SampleBuffer) {
        self.buffers[idx] = buffer;
    }
}
