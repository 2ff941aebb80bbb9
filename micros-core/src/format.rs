//! Stream formats and channel maps.

use crate::error::{MicrosError, Result};

/// Nominal sample rate of a description that accepts any rate within its range.
pub const ANY_RATE: f64 = 0.0;

/// Identifies the data format of a stream description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatId {
    LinearPcm,
    /// Compressed or otherwise non-PCM data, tagged with the platform's code.
    Other(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Float,
    SignedInt,
    UnsignedInt,
}

/// Encoding of a single sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleEncoding {
    pub kind: SampleKind,
    pub bits: u16,
    /// Samples occupy all bits of their container without padding
    pub packed: bool,
}

impl SampleEncoding {
    pub const F32: Self = Self::float(32);
    pub const F64: Self = Self::float(64);
    pub const I16: Self = Self::signed(16);

    pub const fn float(bits: u16) -> Self {
        Self {
            kind: SampleKind::Float,
            bits,
            packed: true,
        }
    }

    pub const fn signed(bits: u16) -> Self {
        Self {
            kind: SampleKind::SignedInt,
            bits,
            packed: true,
        }
    }

    pub const fn unsigned(bits: u16) -> Self {
        Self {
            kind: SampleKind::UnsignedInt,
            bits,
            packed: true,
        }
    }

    pub fn is_packed_float(&self) -> bool {
        self.kind == SampleKind::Float && self.packed
    }

    pub fn bytes(&self) -> usize {
        (self.bits as usize).div_ceil(8)
    }
}

/// A concrete stream format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamFormat {
    pub sample_rate: f64,
    pub channels: u16,
    pub encoding: SampleEncoding,
}

impl StreamFormat {
    pub fn new(sample_rate: f64, channels: u16, encoding: SampleEncoding) -> Self {
        Self {
            sample_rate,
            channels,
            encoding,
        }
    }

    /// Size of one frame (one sample per channel) in bytes.
    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.encoding.bytes()
    }

    pub fn is_any_rate(&self) -> bool {
        self.sample_rate == ANY_RATE
    }
}

impl std::fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.encoding.kind {
            SampleKind::Float => "f",
            SampleKind::SignedInt => "i",
            SampleKind::UnsignedInt => "u",
        };
        if self.is_any_rate() {
            write!(f, "{}ch any-rate {}{}", self.channels, kind, self.encoding.bits)
        } else {
            write!(
                f,
                "{}ch {}Hz {}{}",
                self.channels, self.sample_rate, kind, self.encoding.bits
            )
        }
    }
}

/// Inclusive range of sample rates a description supports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateRange {
    pub min: f64,
    pub max: f64,
}

impl RateRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn fixed(rate: f64) -> Self {
        Self {
            min: rate,
            max: rate,
        }
    }

    pub fn contains(&self, rate: f64) -> bool {
        self.min <= rate && rate <= self.max
    }
}

/// One format a hardware stream can be switched to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormatDescription {
    pub format_id: FormatId,
    pub format: StreamFormat,
    pub rate_range: RateRange,
}

impl FormatDescription {
    /// Linear PCM description with a single nominal rate.
    pub fn pcm(format: StreamFormat) -> Self {
        Self {
            format_id: FormatId::LinearPcm,
            format,
            rate_range: RateRange::fixed(format.sample_rate),
        }
    }

    /// Linear PCM description accepting any rate within `range`.
    pub fn pcm_any_rate(channels: u16, encoding: SampleEncoding, range: RateRange) -> Self {
        Self {
            format_id: FormatId::LinearPcm,
            format: StreamFormat::new(ANY_RATE, channels, encoding),
            rate_range: range,
        }
    }
}

/// Hardware channels (1-based) carrying the left and right roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMap {
    left: u32,
    right: u32,
}

impl ChannelMap {
    /// Builds a map from resolved slots; both must be present, non-zero and distinct.
    pub fn resolve(left: Option<u32>, right: Option<u32>) -> Result<Self> {
        match (left, right) {
            (Some(l), Some(r)) if l != 0 && r != 0 && l != r => Ok(Self { left: l, right: r }),
            _ => Err(MicrosError::ChannelUnresolved { left, right }),
        }
    }

    /// Channels 1 and 2 of an interleaved stereo buffer.
    pub fn stereo() -> Self {
        Self { left: 1, right: 2 }
    }

    pub fn left(&self) -> u32 {
        self.left
    }

    pub fn right(&self) -> u32 {
        self.right
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_counts_all_channels() {
        let format = StreamFormat::new(48000.0, 2, SampleEncoding::F32);
        assert_eq!(format.frame_size(), 8);
        let format = StreamFormat::new(44100.0, 6, SampleEncoding::signed(24));
        assert_eq!(format.frame_size(), 18);
    }

    #[test]
    fn channel_map_requires_both_distinct_slots() {
        assert!(ChannelMap::resolve(Some(1), Some(2)).is_ok());
        assert!(matches!(
            ChannelMap::resolve(Some(1), None),
            Err(MicrosError::ChannelUnresolved {
                left: Some(1),
                right: None
            })
        ));
        assert!(ChannelMap::resolve(Some(3), Some(3)).is_err());
        assert!(ChannelMap::resolve(Some(0), Some(1)).is_err());
    }

    #[test]
    fn display_marks_wildcard_rates() {
        let fixed = StreamFormat::new(48000.0, 2, SampleEncoding::F32);
        assert_eq!(fixed.to_string(), "2ch 48000Hz f32");
        let any = StreamFormat::new(ANY_RATE, 2, SampleEncoding::I16);
        assert_eq!(any.to_string(), "2ch any-rate i16");
    }
}
