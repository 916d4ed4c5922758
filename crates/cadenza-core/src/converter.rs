//! Format conversion between connection endpoints.
//!
//! A [`FormatConverter`] maps channels, resamples, and quantizes, in that order.
//! Converters are built on the control thread when a snapshot is committed and
//! only run when the two formats actually differ; a connection whose formats
//! [`match`](crate::format::Format::matches) reads its source buffer directly.
//!
//! # Channel mapping
//!
//! [`ChannelMap::derive`] covers the layouts with an unambiguous rule:
//!
//! | source → destination | rule |
//! |---|---|
//! | n → n | identity |
//! | n → 1 | average every channel |
//! | 1 → n | duplicate |
//! | k·m → m | average channels `d, d+m, d+2m, ...` into `d` |
//! | m → k·m | destination `d` copies source `d mod m` |
//!
//! Anything else needs an explicit table via [`ChannelMap::from_table`].
//!
//! # Resampling
//!
//! Linear interpolation with a fixed latency of one source frame. Destination
//! frame `k` reads source position `k * (source_rate / destination_rate) - 1`.
//! Positions are global frame counts, so a converter fed consecutive chunks
//! produces the same output as one fed the whole stream at once. For a
//! full-scale sinusoid at frequency `f` the interpolation error is bounded by
//! `(pi * f / source_rate)^2 / 2`.

use crate::buffer::{BufferView, SampleBuffer};
use crate::error::{Error, Result};
use crate::format::{Format, MAX_RATE_RATIO, rate_ratio_supported};

/// Destination-to-source channel table.
///
/// Each destination channel lists the source channels averaged into it. An
/// empty list produces silence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelMap {
    source_channels: usize,
    sources: Vec<Vec<usize>>,
}

impl ChannelMap {
    /// Identity map for `channels` channels.
    pub fn identity(channels: usize) -> Self {
        Self {
            source_channels: channels,
            sources: (0..channels).map(|ch| vec![ch]).collect(),
        }
    }

    /// Derives the default map between two channel counts.
    pub fn derive(source: usize, destination: usize) -> Result<Self> {
        if source == 0 || destination == 0 {
            return Err(Error::UnsupportedFormat(
                "channel map needs at least one channel on each side".into(),
            ));
        }
        let sources = if source == destination {
            return Ok(Self::identity(source));
        } else if destination == 1 {
            vec![(0..source).collect()]
        } else if source == 1 {
            vec![vec![0]; destination]
        } else if source % destination == 0 {
            (0..destination)
                .map(|d| (d..source).step_by(destination).collect())
                .collect()
        } else if destination % source == 0 {
            (0..destination).map(|d| vec![d % source]).collect()
        } else {
            return Err(Error::UnsupportedFormat(format!(
                "no channel mapping rule from {source} to {destination} channels"
            )));
        };
        Ok(Self {
            source_channels: source,
            sources,
        })
    }

    /// Builds a map from an explicit table, one entry per destination channel.
    pub fn from_table(source_channels: usize, table: Vec<Vec<usize>>) -> Result<Self> {
        if table.is_empty() {
            return Err(Error::UnsupportedFormat("channel map table is empty".into()));
        }
        if let Some(bad) = table.iter().flatten().find(|&&ch| ch >= source_channels) {
            return Err(Error::UnsupportedFormat(format!(
                "channel map references source channel {bad} of {source_channels}"
            )));
        }
        Ok(Self {
            source_channels,
            sources: table,
        })
    }

    /// Number of source channels the map reads.
    pub fn source_channels(&self) -> usize {
        self.source_channels
    }

    /// Number of destination channels the map writes.
    pub fn destination_channels(&self) -> usize {
        self.sources.len()
    }

    /// Source channels feeding destination channel `channel`.
    pub fn sources(&self, channel: usize) -> &[usize] {
        &self.sources[channel]
    }

    /// Returns true if every destination channel copies the same source channel.
    pub fn is_identity(&self) -> bool {
        self.source_channels == self.sources.len()
            && self
                .sources
                .iter()
                .enumerate()
                .all(|(d, s)| s.len() == 1 && s[0] == d)
    }

    #[inline]
    fn mix(&self, channel: usize, input: &BufferView<'_>, frame: usize) -> f32 {
        match self.sources[channel].as_slice() {
            [] => 0.0,
            [single] => input.channel(*single)[frame],
            many => {
                let sum: f32 = many.iter().map(|&s| input.channel(s)[frame]).sum();
                sum / many.len() as f32
            }
        }
    }
}

/// Position in a source stream aligned to destination frame `position`.
///
/// This is the number of source frames that must have been consumed before
/// destination frame `position` can be produced with one frame of latency.
#[inline]
pub(crate) fn source_position(step: f64, position: u64) -> u64 {
    if position == 0 {
        0
    } else {
        ((position - 1) as f64 * step).floor() as u64 + 1
    }
}

/// Source frames needed to produce `frames` destination frames starting at `position`.
#[inline]
pub(crate) fn source_frames_for(step: f64, position: u64, frames: usize) -> usize {
    (source_position(step, position + frames as u64) - source_position(step, position)) as usize
}

/// Streaming linear interpolator state.
#[derive(Debug, Clone)]
struct Resampler {
    /// Source frames per destination frame.
    step: f64,
    next_out: u64,
    next_in: u64,
    /// Last two mapped source frames per destination channel.
    history: Vec<[f32; 2]>,
}

impl Resampler {
    fn new(step: f64, channels: usize) -> Self {
        Self {
            step,
            next_out: 0,
            next_in: 0,
            history: vec![[0.0; 2]; channels],
        }
    }

    fn align(&mut self, position: u64) {
        self.next_out = position;
        self.next_in = source_position(self.step, position);
        for h in &mut self.history {
            *h = [0.0; 2];
        }
    }

    /// Mapped source sample at global index `index` for destination channel `channel`.
    #[inline]
    fn sample(&self, map: &ChannelMap, input: &BufferView<'_>, channel: usize, index: i64) -> f32 {
        let next_in = self.next_in as i64;
        if index < 0 {
            return 0.0;
        }
        if index < next_in {
            let back = next_in - index;
            return match back {
                1 => self.history[channel][1],
                2 => self.history[channel][0],
                _ => 0.0,
            };
        }
        let available = input.frames() as i64;
        if available == 0 {
            return self.history[channel][1];
        }
        let local = (index - next_in).min(available - 1) as usize;
        map.mix(channel, input, local)
    }

    /// Destination frames producible from `available` more source frames.
    fn frames_available(&self, available: usize) -> usize {
        let end = ((self.next_in + available as u64) as f64 / self.step).ceil() as u64;
        end.saturating_sub(self.next_out) as usize
    }

    fn run(
        &mut self,
        map: &ChannelMap,
        input: &BufferView<'_>,
        output: &mut SampleBuffer,
        frames: usize,
        quantize: impl Fn(f32) -> f32,
    ) {
        let channels = output.channel_count();
        for d in 0..channels {
            let out = output.channel_mut(d);
            for (j, o) in out.iter_mut().enumerate().take(frames) {
                let x = (self.next_out + j as u64) as f64 * self.step - 1.0;
                let base = x.floor();
                let frac = (x - base) as f32;
                let i0 = base as i64;
                let a = self.sample(map, input, d, i0);
                let b = self.sample(map, input, d, i0 + 1);
                *o = quantize(a + (b - a) * frac);
            }
        }
        let end = (self.next_in + input.frames() as u64) as i64;
        for d in 0..channels {
            let h0 = self.sample(map, input, d, end - 2);
            let h1 = self.sample(map, input, d, end - 1);
            self.history[d] = [h0, h1];
        }
        self.next_in += input.frames() as u64;
        self.next_out += frames as u64;
    }
}

/// Converts audio from one [`Format`] to another.
#[derive(Debug, Clone)]
pub struct FormatConverter {
    source: Format,
    destination: Format,
    map: ChannelMap,
    resampler: Option<Resampler>,
    aligned: bool,
}

impl FormatConverter {
    /// Creates a converter using the derived channel map.
    pub fn new(source: Format, destination: Format) -> Result<Self> {
        let map = ChannelMap::derive(source.channel_count(), destination.channel_count())?;
        Self::with_channel_map(source, destination, map)
    }

    /// Creates a converter with an explicit channel map.
    pub fn with_channel_map(source: Format, destination: Format, map: ChannelMap) -> Result<Self> {
        if map.source_channels() != source.channel_count()
            || map.destination_channels() != destination.channel_count()
        {
            return Err(Error::UnsupportedFormat(format!(
                "channel map {}→{} does not fit {} → {}",
                map.source_channels(),
                map.destination_channels(),
                source.channel_count(),
                destination.channel_count()
            )));
        }
        if !rate_ratio_supported(source.sample_rate(), destination.sample_rate()) {
            return Err(Error::UnsupportedFormat(format!(
                "rate ratio {} → {} exceeds {MAX_RATE_RATIO}:1",
                source.sample_rate(),
                destination.sample_rate()
            )));
        }
        let resampler = (source.sample_rate() != destination.sample_rate()).then(|| {
            Resampler::new(
                source.sample_rate() / destination.sample_rate(),
                destination.channel_count(),
            )
        });
        Ok(Self {
            source,
            destination,
            map,
            resampler,
            aligned: false,
        })
    }

    /// Source format.
    pub fn source(&self) -> &Format {
        &self.source
    }

    /// Destination format.
    pub fn destination(&self) -> &Format {
        &self.destination
    }

    /// Channel map in use.
    pub fn channel_map(&self) -> &ChannelMap {
        &self.map
    }

    /// Returns true when no processing is needed between the two formats.
    pub fn is_passthrough(&self) -> bool {
        self.source.matches(&self.destination) && self.map.is_identity()
    }

    /// Returns true when the converter changes the sample rate.
    pub fn is_resampling(&self) -> bool {
        self.resampler.is_some()
    }

    /// Upper bound on destination frames produced from `frames` source frames.
    pub fn max_output_frames(&self, frames: usize) -> usize {
        let ratio = self.destination.sample_rate() / self.source.sample_rate();
        (frames as f64 * ratio).ceil() as usize
    }

    /// Forgets stream position and interpolation history.
    pub fn reset(&mut self) {
        self.aligned = false;
        if let Some(r) = &mut self.resampler {
            r.align(0);
        }
    }

    /// Converts a chunk of a continuous stream.
    ///
    /// Produces up to `ceil(N * destination_rate / source_rate)` frames into
    /// `output`, re-tagging it with the destination format. Consecutive calls
    /// continue where the previous one stopped. Fails with
    /// [`Error::CapacityExceeded`] when `output` is too small, leaving the
    /// converter state untouched.
    pub fn convert(&mut self, input: &BufferView<'_>, output: &mut SampleBuffer) -> Result<usize> {
        self.check_input(input)?;
        let frames = match &self.resampler {
            Some(r) => r.frames_available(input.frames()),
            None => input.frames(),
        };
        self.prepare_output(output, frames)?;
        self.process(input, output, frames);
        Ok(frames)
    }

    /// Converts one render quantum of `frames` destination frames starting at
    /// the global destination frame `position`.
    ///
    /// `input` must hold exactly the source frames aligned to that span.
    pub(crate) fn render(
        &mut self,
        input: &BufferView<'_>,
        output: &mut SampleBuffer,
        position: u64,
        frames: usize,
    ) -> Result<()> {
        if let Some(r) = &mut self.resampler {
            if !self.aligned || r.next_out != position {
                r.align(position);
                self.aligned = true;
            }
        }
        self.prepare_output(output, frames)?;
        self.process(input, output, frames);
        Ok(())
    }

    fn check_input(&self, input: &BufferView<'_>) -> Result<()> {
        if input.channel_count() != self.source.channel_count()
            || input.format().sample_rate() != self.source.sample_rate()
        {
            return Err(Error::UnsupportedFormat(format!(
                "converter expects {} but got {}",
                self.source,
                input.format()
            )));
        }
        Ok(())
    }

    fn prepare_output(&self, output: &mut SampleBuffer, frames: usize) -> Result<()> {
        if frames > output.frame_capacity() {
            return Err(Error::CapacityExceeded {
                requested: frames,
                capacity: output.frame_capacity(),
            });
        }
        output.set_format(self.destination)?;
        output.set_frame_length(frames)
    }

    fn process(&mut self, input: &BufferView<'_>, output: &mut SampleBuffer, frames: usize) {
        let sample_format = self.destination.sample_format();
        let quantize = |s: f32| sample_format.quantize(s);
        match &mut self.resampler {
            Some(r) => r.run(&self.map, input, output, frames, quantize),
            None => {
                let available = input.frames();
                for d in 0..output.channel_count() {
                    let out = output.channel_mut(d);
                    let (head, tail) = out.split_at_mut(available.min(out.len()));
                    for (frame, o) in head.iter_mut().enumerate() {
                        *o = quantize(self.map.mix(d, input, frame));
                    }
                    tail.fill(0.0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleFormat;

    fn fmt(rate: f64, channels: u16, sf: SampleFormat) -> Format {
        Format::new(rate, channels, sf).unwrap()
    }

    fn filled(format: Format, frames: usize, f: impl Fn(usize, usize) -> f32) -> SampleBuffer {
        let mut buf = SampleBuffer::allocate(format, frames);
        let mut view = buf.frames(frames).unwrap();
        for ch in 0..format.channel_count() {
            for (i, s) in view.channel_mut(ch).iter_mut().enumerate() {
                *s = f(ch, i);
            }
        }
        buf
    }

    #[test]
    fn test_derive_rules() {
        assert!(ChannelMap::derive(2, 2).unwrap().is_identity());
        assert_eq!(ChannelMap::derive(3, 1).unwrap().sources(0), &[0, 1, 2]);
        assert_eq!(ChannelMap::derive(1, 4).unwrap().sources(3), &[0]);
        let down = ChannelMap::derive(4, 2).unwrap();
        assert_eq!(down.sources(0), &[0, 2]);
        assert_eq!(down.sources(1), &[1, 3]);
        let up = ChannelMap::derive(2, 6).unwrap();
        assert_eq!(up.sources(5), &[1]);
        assert!(matches!(
            ChannelMap::derive(2, 3),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_table_validation() {
        assert!(ChannelMap::from_table(2, vec![vec![1], vec![0]]).is_ok());
        assert!(ChannelMap::from_table(2, vec![vec![2]]).is_err());
        assert!(ChannelMap::from_table(2, vec![]).is_err());
    }

    #[test]
    fn test_downmix_averages() {
        let src = filled(fmt(48_000.0, 2, SampleFormat::Float32), 4, |ch, _| {
            if ch == 0 { 0.2 } else { 0.6 }
        });
        let mono = fmt(48_000.0, 1, SampleFormat::Float32);
        let mut conv = FormatConverter::new(*src.format(), mono).unwrap();
        let mut out = SampleBuffer::allocate(mono, 4);
        assert_eq!(conv.convert(&src.view(), &mut out).unwrap(), 4);
        for &s in out.channel(0) {
            assert!((s - 0.4).abs() < 1e-6);
        }
    }

    #[test]
    fn test_swap_table_override() {
        let stereo = fmt(48_000.0, 2, SampleFormat::Float32);
        let src = filled(stereo, 3, |ch, _| ch as f32);
        let map = ChannelMap::from_table(2, vec![vec![1], vec![0]]).unwrap();
        let mut conv = FormatConverter::with_channel_map(stereo, stereo, map).unwrap();
        assert!(!conv.is_passthrough());
        let mut out = SampleBuffer::allocate(stereo, 3);
        conv.convert(&src.view(), &mut out).unwrap();
        assert_eq!(out.channel(0), &[1.0; 3]);
        assert_eq!(out.channel(1), &[0.0; 3]);
    }

    #[test]
    fn test_int16_round_trip_within_one_lsb() {
        let float = fmt(44_100.0, 2, SampleFormat::Float32);
        let int16 = fmt(44_100.0, 2, SampleFormat::Int16);
        let src = filled(float, 256, |ch, i| ((i as f32 * 0.037 + ch as f32).sin()) * 0.9);
        let mut to_int = FormatConverter::new(float, int16).unwrap();
        let mut back = FormatConverter::new(int16, float).unwrap();
        let mut mid = SampleBuffer::allocate(int16, 256);
        let mut out = SampleBuffer::allocate(float, 256);
        to_int.convert(&src.view(), &mut mid).unwrap();
        back.convert(&mid.view(), &mut out).unwrap();
        let lsb = SampleFormat::Int16.lsb();
        for ch in 0..2 {
            for (a, b) in src.channel(ch).iter().zip(out.channel(ch)) {
                assert!((a - b).abs() <= lsb, "{a} vs {b}");
            }
        }
    }

    #[test]
    fn test_resample_output_length() {
        let a = fmt(44_100.0, 1, SampleFormat::Float32);
        let b = fmt(48_000.0, 1, SampleFormat::Float32);
        let src = filled(a, 1000, |_, _| 0.5);
        let mut conv = FormatConverter::new(a, b).unwrap();
        assert!(conv.is_resampling());
        let mut out = SampleBuffer::allocate(b, 2000);
        let produced = conv.convert(&src.view(), &mut out).unwrap();
        assert_eq!(produced, conv.max_output_frames(1000));
        assert_eq!(produced, 1089);
        // One source frame of latency, then the constant comes through.
        assert_eq!(out.channel(0)[0], 0.0);
        assert!(out.channel(0)[4..].iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_resample_chunked_matches_whole() {
        let a = fmt(48_000.0, 1, SampleFormat::Float32);
        let b = fmt(32_000.0, 1, SampleFormat::Float32);
        let src = filled(a, 600, |_, i| (i as f32 * 0.05).sin());
        let mut whole = FormatConverter::new(a, b).unwrap();
        let mut out_whole = SampleBuffer::allocate(b, 600);
        let n = whole.convert(&src.view(), &mut out_whole).unwrap();

        let mut chunked = FormatConverter::new(a, b).unwrap();
        let mut collected = Vec::new();
        let mut chunk = SampleBuffer::allocate(a, 100);
        let mut out = SampleBuffer::allocate(b, 100);
        for start in (0..600).step_by(100) {
            let mut view = chunk.frames(100).unwrap();
            view.channel_mut(0)
                .copy_from_slice(&src.channel(0)[start..start + 100]);
            let produced = chunked.convert(&chunk.view(), &mut out).unwrap();
            collected.extend_from_slice(&out.channel(0)[..produced]);
        }
        assert_eq!(collected.len(), n);
        for (x, y) in collected.iter().zip(out_whole.channel(0)) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_capacity_exceeded_leaves_state() {
        let a = fmt(48_000.0, 2, SampleFormat::Float32);
        let src = filled(a, 64, |_, _| 0.1);
        let mut conv = FormatConverter::new(a, a.with_sample_format(SampleFormat::Int24)).unwrap();
        let mut small = SampleBuffer::allocate(a, 32);
        assert!(matches!(
            conv.convert(&src.view(), &mut small),
            Err(Error::CapacityExceeded { requested: 64, capacity: 32 })
        ));
    }

    #[test]
    fn test_rejects_extreme_ratio() {
        let a = fmt(8_000.0, 1, SampleFormat::Float32);
        let b = fmt(192_000.0, 1, SampleFormat::Float32);
        assert!(matches!(
            FormatConverter::new(a, b),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_source_frames_track_global_clock() {
        let step = 44_100.0 / 48_000.0;
        let mut total = 0;
        let mut position = 0;
        for _ in 0..100 {
            total += source_frames_for(step, position, 480);
            position += 480;
        }
        assert_eq!(total as u64, source_position(step, position));
        assert!(total.abs_diff(44_100) <= 1);
    }
}
