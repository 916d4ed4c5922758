//! Format descriptors: sample rate, channel count, layout, and sample encoding.
//!
//! A [`Format`] is an immutable value. Every buffer in the engine stores
//! normalized `f32` samples regardless of its format; the [`SampleFormat`]
//! determines the valid range and the quantization grid those samples are held
//! to, and the interleaving flag only matters where audio crosses a boundary
//! (hardware callback or file).

use core::fmt;
use core::str::FromStr;

use crate::converter::ChannelMap;
use crate::error::{Error, Result};

/// Maximum channel count of any format.
pub const MAX_CHANNELS: u16 = 32;

/// Largest supported ratio between two sample rates on one connection.
pub const MAX_RATE_RATIO: f64 = 8.0;

/// Sample encoding carried by a [`Format`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum SampleFormat {
    /// 16-bit signed integer.
    Int16,
    /// 24-bit signed integer.
    Int24,
    /// 32-bit signed integer.
    Int32,
    /// 32-bit IEEE float.
    #[default]
    Float32,
    /// 64-bit IEEE float.
    Float64,
}

impl SampleFormat {
    /// Bits per sample.
    pub fn bits(self) -> u16 {
        match self {
            Self::Int16 => 16,
            Self::Int24 => 24,
            Self::Int32 | Self::Float32 => 32,
            Self::Float64 => 64,
        }
    }

    /// Returns true for the floating-point encodings.
    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Number of quantization steps per unit of amplitude, or `None` for floats.
    fn scale(self) -> Option<f32> {
        match self {
            Self::Int16 => Some(32_768.0),
            Self::Int24 => Some(8_388_608.0),
            Self::Int32 => Some(2_147_483_648.0),
            Self::Float32 | Self::Float64 => None,
        }
    }

    /// Size of one quantization step. Zero for float encodings.
    pub fn lsb(self) -> f32 {
        self.scale().map_or(0.0, |s| 1.0 / s)
    }

    /// Smallest valid normalized sample.
    pub fn min_value(self) -> f32 {
        -1.0
    }

    /// Largest valid normalized sample.
    ///
    /// Integer encodings are asymmetric: the positive peak is one step below 1.0.
    pub fn max_value(self) -> f32 {
        match self {
            Self::Int16 | Self::Int24 => 1.0 - self.lsb(),
            // One step below 1.0 is not representable in f32 at 32-bit resolution.
            Self::Int32 | Self::Float32 | Self::Float64 => 1.0,
        }
    }

    /// Clamps a sample to the valid range.
    #[inline]
    pub fn clamp(self, sample: f32) -> f32 {
        sample.clamp(self.min_value(), self.max_value())
    }

    /// Rounds a sample onto this encoding's grid and clamps integer encodings.
    ///
    /// Float encodings pass samples through untouched.
    #[inline]
    pub fn quantize(self, sample: f32) -> f32 {
        match self.scale() {
            Some(scale) => ((sample * scale).round() / scale).clamp(-1.0, self.max_value()),
            None => sample,
        }
    }

    /// Short lowercase name, as used in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            Self::Int16 => "i16",
            Self::Int24 => "i24",
            Self::Int32 => "i32",
            Self::Float32 => "f32",
            Self::Float64 => "f64",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SampleFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "i16" | "int16" | "16" => Ok(Self::Int16),
            "i24" | "int24" | "24" => Ok(Self::Int24),
            "i32" | "int32" => Ok(Self::Int32),
            "f32" | "float32" | "32" => Ok(Self::Float32),
            "f64" | "float64" | "64" => Ok(Self::Float64),
            other => Err(Error::UnsupportedFormat(format!(
                "unknown sample format '{other}'"
            ))),
        }
    }
}

/// Describes a stream of audio: rate, channel count, layout, and encoding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Format {
    sample_rate: f64,
    channel_count: u16,
    interleaved: bool,
    sample_format: SampleFormat,
}

impl Format {
    /// Creates a planar format.
    ///
    /// Fails with [`Error::UnsupportedFormat`] when the rate is not a positive
    /// finite number or the channel count is outside `1..=MAX_CHANNELS`.
    pub fn new(sample_rate: f64, channel_count: u16, sample_format: SampleFormat) -> Result<Self> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(Error::UnsupportedFormat(format!(
                "sample rate {sample_rate} is not positive"
            )));
        }
        if channel_count == 0 || channel_count > MAX_CHANNELS {
            return Err(Error::UnsupportedFormat(format!(
                "channel count {channel_count} outside 1..={MAX_CHANNELS}"
            )));
        }
        Ok(Self {
            sample_rate,
            channel_count,
            interleaved: false,
            sample_format,
        })
    }

    /// Returns a copy with the given interleaving flag.
    pub fn with_interleaved(mut self, interleaved: bool) -> Self {
        self.interleaved = interleaved;
        self
    }

    /// Returns a copy with another sample encoding.
    pub fn with_sample_format(mut self, sample_format: SampleFormat) -> Self {
        self.sample_format = sample_format;
        self
    }

    /// Returns a copy with another channel count.
    pub fn with_channel_count(self, channel_count: u16) -> Result<Self> {
        Self::new(self.sample_rate, channel_count, self.sample_format)
            .map(|f| f.with_interleaved(self.interleaved))
    }

    /// Returns a copy with another sample rate.
    pub fn with_sample_rate(self, sample_rate: f64) -> Result<Self> {
        Self::new(sample_rate, self.channel_count, self.sample_format)
            .map(|f| f.with_interleaved(self.interleaved))
    }

    /// Frames per second.
    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Number of channels.
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channel_count as usize
    }

    /// Whether samples are laid out frame by frame at boundaries.
    #[inline]
    pub fn is_interleaved(&self) -> bool {
        self.interleaved
    }

    /// Sample encoding.
    #[inline]
    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    /// Returns true when audio in `self` can be used as `other` without any
    /// conversion. Interleaving is a boundary concern and is ignored.
    pub fn matches(&self, other: &Format) -> bool {
        self.sample_rate == other.sample_rate
            && self.channel_count == other.channel_count
            && self.sample_format == other.sample_format
    }

    /// Returns true when a conversion rule exists from `self` to `other`.
    ///
    /// Any encoding converts to any other; channel layouts follow the rules
    /// of [`ChannelMap::derive`]; sample rates must be within
    /// [`MAX_RATE_RATIO`] of each other.
    pub fn can_convert_to(&self, other: &Format) -> bool {
        rate_ratio_supported(self.sample_rate, other.sample_rate)
            && ChannelMap::derive(self.channel_count(), other.channel_count()).is_ok()
    }
}

impl Default for Format {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            channel_count: 2,
            interleaved: false,
            sample_format: SampleFormat::Float32,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}, {}",
            self.sample_rate,
            self.channel_count,
            self.sample_format,
            if self.interleaved { "interleaved" } else { "planar" }
        )
    }
}

/// Returns true when converting between the two rates stays within [`MAX_RATE_RATIO`].
pub(crate) fn rate_ratio_supported(from: f64, to: f64) -> bool {
    let ratio = if from > to { from / to } else { to / from };
    ratio <= MAX_RATE_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_rate_and_channels() {
        assert!(Format::new(0.0, 2, SampleFormat::Float32).is_err());
        assert!(Format::new(f64::NAN, 2, SampleFormat::Float32).is_err());
        assert!(Format::new(48_000.0, 0, SampleFormat::Float32).is_err());
        assert!(Format::new(48_000.0, MAX_CHANNELS + 1, SampleFormat::Float32).is_err());
        assert!(Format::new(48_000.0, MAX_CHANNELS, SampleFormat::Float32).is_ok());
    }

    #[test]
    fn test_matches_ignores_interleaving() {
        let planar = Format::new(44_100.0, 2, SampleFormat::Int16).unwrap();
        let interleaved = planar.with_interleaved(true);
        assert!(planar.matches(&interleaved));
        assert_ne!(planar, interleaved);
        assert!(!planar.matches(&planar.with_sample_format(SampleFormat::Float32)));
    }

    #[test]
    fn test_convertibility() {
        let stereo = Format::new(48_000.0, 2, SampleFormat::Float32).unwrap();
        let mono = stereo.with_channel_count(1).unwrap();
        let six = stereo.with_channel_count(6).unwrap();
        let three = stereo.with_channel_count(3).unwrap();
        assert!(stereo.can_convert_to(&mono));
        assert!(mono.can_convert_to(&six));
        assert!(six.can_convert_to(&stereo));
        assert!(!stereo.can_convert_to(&three));
        let slow = stereo.with_sample_rate(4_000.0).unwrap();
        assert!(!slow.can_convert_to(&stereo));
        assert!(stereo.with_sample_rate(8_000.0).unwrap().can_convert_to(&stereo));
    }

    #[test]
    fn test_quantize_int16_grid() {
        let q = SampleFormat::Int16.quantize(0.500_01);
        assert_eq!(q, 16_384.0 / 32_768.0);
        assert_eq!(SampleFormat::Int16.quantize(2.0), 32_767.0 / 32_768.0);
        assert_eq!(SampleFormat::Int16.quantize(-2.0), -1.0);
        assert_eq!(SampleFormat::Float32.quantize(1.5), 1.5);
    }

    #[test]
    fn test_parse_sample_format() {
        assert_eq!("i24".parse::<SampleFormat>().unwrap(), SampleFormat::Int24);
        assert_eq!("F32".parse::<SampleFormat>().unwrap(), SampleFormat::Float32);
        assert!("u8".parse::<SampleFormat>().is_err());
        assert_eq!(SampleFormat::Float64.to_string(), "f64");
    }
}
