//! WAV file reading and writing.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use cadenza_core::{
    BufferView, BufferViewMut, Format, OfflineSink, OfflineSource, SampleBuffer, SampleFormat,
};
use hound::{WavReader, WavWriter};

use crate::{Error, Result};

/// WAV file metadata extracted without loading sample data.
#[derive(Debug, Clone, Copy)]
pub struct WavInfo {
    /// Rate, channel count, and sample encoding of the file.
    pub format: Format,
    /// Bit depth per sample.
    pub bits_per_sample: u16,
    /// Total number of sample frames (samples per channel).
    pub num_frames: u64,
    /// Duration in seconds.
    pub duration_secs: f64,
}

/// Read WAV metadata without loading sample data.
pub fn read_wav_info<P: AsRef<Path>>(path: P) -> Result<WavInfo> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let format = Format::new(
        f64::from(spec.sample_rate),
        spec.channels,
        sample_format_for(&spec)?,
    )?;
    let num_frames = u64::from(reader.duration());
    Ok(WavInfo {
        format,
        bits_per_sample: spec.bits_per_sample,
        num_frames,
        duration_secs: num_frames as f64 / f64::from(spec.sample_rate),
    })
}

/// Maps a WAV header onto an engine sample format.
///
/// Supports 16, 24, and 32-bit PCM and 32-bit IEEE float.
pub fn sample_format_for(spec: &hound::WavSpec) -> Result<SampleFormat> {
    match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => Ok(SampleFormat::Int16),
        (hound::SampleFormat::Int, 24) => Ok(SampleFormat::Int24),
        (hound::SampleFormat::Int, 32) => Ok(SampleFormat::Int32),
        (hound::SampleFormat::Float, 32) => Ok(SampleFormat::Float32),
        (encoding, bits) => Err(Error::UnsupportedFormat(format!(
            "{bits}-bit {encoding:?} WAV"
        ))),
    }
}

/// Builds the WAV header written for `format`.
///
/// The layout flag is ignored: WAV data is always interleaved.
pub fn wav_spec_for(format: &Format) -> Result<hound::WavSpec> {
    let (sample_format, bits_per_sample) = match format.sample_format() {
        SampleFormat::Int16 => (hound::SampleFormat::Int, 16),
        SampleFormat::Int24 => (hound::SampleFormat::Int, 24),
        SampleFormat::Int32 => (hound::SampleFormat::Int, 32),
        SampleFormat::Float32 => (hound::SampleFormat::Float, 32),
        SampleFormat::Float64 => {
            return Err(Error::UnsupportedFormat(
                "64-bit float WAV output".to_string(),
            ));
        }
    };
    let rate = format.sample_rate();
    if rate.fract() != 0.0 || rate > f64::from(u32::MAX) {
        return Err(Error::UnsupportedFormat(format!(
            "WAV sample rate must be a whole number of Hz, got {rate}"
        )));
    }
    Ok(hound::WavSpec {
        channels: format.channel_count() as u16,
        sample_rate: rate as u32,
        bits_per_sample,
        sample_format,
    })
}

fn int_scale(bits: u16) -> f32 {
    (1i64 << (bits - 1)) as f32
}

/// Streaming WAV decoder producing planar engine buffers.
pub struct WavFileReader {
    reader: WavReader<BufReader<File>>,
    format: Format,
    frames: u64,
    remaining: u64,
}

impl WavFileReader {
    /// Opens `path` and parses its header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = WavReader::open(path)?;
        let spec = reader.spec();
        let format = Format::new(
            f64::from(spec.sample_rate),
            spec.channels,
            sample_format_for(&spec)?,
        )?;
        let frames = u64::from(reader.duration());
        tracing::debug!(path = %path.display(), %format, frames, "wav opened");
        Ok(Self {
            reader,
            format,
            frames,
            remaining: frames,
        })
    }

    /// Format of the decoded audio.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Total frames in the file.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Frames not yet decoded.
    pub fn remaining_frames(&self) -> u64 {
        self.remaining
    }

    /// Decodes the next frames into `buffer`, up to its frame capacity.
    ///
    /// Re-tags `buffer` with the file format and sets its frame length to the
    /// number of frames decoded, which is zero at end of file. If decoding
    /// fails part way, the frame length still covers every complete frame
    /// and the reader advances past them before the error is returned.
    pub fn read_chunk(&mut self, buffer: &mut SampleBuffer) -> Result<usize> {
        buffer.set_format(self.format)?;
        let frames = (buffer.frame_capacity() as u64).min(self.remaining) as usize;
        let scale = int_scale(self.reader.spec().bits_per_sample);

        let mut view = buffer.frames(frames)?;
        let (decoded, failure) = if self.format.sample_format().is_float() {
            deinterleave(self.reader.samples::<f32>(), &mut view)
        } else {
            let samples = self.reader.samples::<i32>();
            deinterleave(samples.map(|s| s.map(|v| v as f32 / scale)), &mut view)
        };
        self.remaining -= decoded as u64;
        buffer.set_frame_length(decoded)?;
        match failure {
            Some(err) => Err(err),
            None => Ok(decoded),
        }
    }

    /// Decodes the rest of the file into a source node.
    pub fn into_source(mut self) -> Result<OfflineSource> {
        let mut buffer = SampleBuffer::allocate(self.format, self.remaining as usize);
        self.read_chunk(&mut buffer)?;
        Ok(OfflineSource::new(buffer))
    }
}

/// Fills `view` frame by frame from interleaved `samples`. Returns the
/// number of complete frames and the error that cut decoding short.
fn deinterleave<I>(mut samples: I, view: &mut BufferViewMut<'_>) -> (usize, Option<Error>)
where
    I: Iterator<Item = hound::Result<f32>>,
{
    let channels = view.channel_count();
    for frame in 0..view.frames() {
        for ch in 0..channels {
            match samples.next() {
                Some(Ok(sample)) => view.channel_mut(ch)[frame] = sample,
                Some(Err(err)) => return (frame, Some(err.into())),
                None => {
                    let eof = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
                    return (frame, Some(eof.into()));
                }
            }
        }
    }
    (view.frames(), None)
}

/// WAV encoder accepting planar engine buffers.
///
/// Implements [`OfflineSink`], so an offline render can write straight to disk.
/// Integer formats are rounded onto the `2^(bits-1)` grid and clamped.
pub struct WavFileWriter {
    writer: WavWriter<BufWriter<File>>,
    format: Format,
    frames: u64,
}

impl WavFileWriter {
    /// Creates (or truncates) `path` for audio in `format`.
    pub fn create<P: AsRef<Path>>(path: P, format: Format) -> Result<Self> {
        let path = path.as_ref();
        let writer = WavWriter::create(path, wav_spec_for(&format)?)?;
        tracing::debug!(path = %path.display(), %format, "wav created");
        Ok(Self {
            writer,
            format,
            frames: 0,
        })
    }

    /// Format written to the file.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Appends a block. Its channel count must match the file.
    pub fn append(&mut self, block: &BufferView<'_>) -> Result<()> {
        let channels = self.format.channel_count();
        if block.channel_count() != channels {
            return Err(Error::UnsupportedFormat(format!(
                "{}-channel block for a {channels}-channel file",
                block.channel_count()
            )));
        }
        match self.format.sample_format() {
            SampleFormat::Float32 | SampleFormat::Float64 => {
                for frame in 0..block.frames() {
                    for ch in 0..channels {
                        self.writer.write_sample(block.channel(ch)[frame])?;
                    }
                }
            }
            integer => {
                let scale = int_scale(integer.bits());
                for frame in 0..block.frames() {
                    for ch in 0..channels {
                        let sample = block.channel(ch)[frame];
                        let value = (sample * scale).round().clamp(-scale, scale - 1.0) as i32;
                        self.writer.write_sample(value)?;
                    }
                }
            }
        }
        self.frames += block.frames() as u64;
        Ok(())
    }

    /// Writes the header sizes and closes the file. Returns frames written.
    pub fn finalize(self) -> Result<u64> {
        self.writer.finalize()?;
        tracing::debug!(frames = self.frames, "wav finalized");
        Ok(self.frames)
    }
}

impl OfflineSink for WavFileWriter {
    type Error = Error;

    fn write(&mut self, block: &BufferView<'_>) -> Result<()> {
        self.append(block)
    }
}
