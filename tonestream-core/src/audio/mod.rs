//! Audio sinks, the hardware-facing end of the stream.
//!
//! The transmitter hands each finished block to an [`AudioSink`] as raw
//! interleaved bytes and trusts the sink to report how much it accepted.
//! Sinks are driven from the transmitter thread only, so `send` may block up
//! to the supplied timeout but must never block indefinitely.
//!
//! # Wire format
//!
//! Every sample occupies a 32-bit little-endian container regardless of the
//! logical bit depth. Logical samples are left-justified: a 16-bit sample
//! lives in the high 16 bits with the low 16 bits zero, a 24-bit sample in the
//! high 24 bits. Frames are interleaved, two slots per frame, slot order given
//! by [`ChannelLayout`].

#[cfg(feature = "audio-cpal")]
pub mod device;
pub mod ring;
pub mod wav;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SinkError;

#[cfg(feature = "audio-cpal")]
pub use device::DeviceOutput;
pub use ring::{create_ring_sink, RingDrain, RingSink};
pub use wav::WavSink;

/// Number of interleaved channels in every frame.
pub const CHANNELS: usize = 2;
/// Size of one sample container in bytes.
pub const BYTES_PER_SAMPLE: usize = 4;
/// Size of one interleaved frame in bytes.
pub const BYTES_PER_FRAME: usize = CHANNELS * BYTES_PER_SAMPLE;

/// Logical sample width carried inside the 32-bit container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BitDepth {
    #[serde(rename = "16")]
    Bits16,
    #[serde(rename = "24")]
    Bits24,
    #[default]
    #[serde(rename = "32")]
    Bits32,
}

impl BitDepth {
    pub fn bits(self) -> u16 {
        match self {
            BitDepth::Bits16 => 16,
            BitDepth::Bits24 => 24,
            BitDepth::Bits32 => 32,
        }
    }

    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            16 => Some(BitDepth::Bits16),
            24 => Some(BitDepth::Bits24),
            32 => Some(BitDepth::Bits32),
            _ => None,
        }
    }

    /// Left-justify a level expressed in 16-bit units into a 32-bit container.
    ///
    /// The level is rounded and clamped to the logical range first, so the
    /// bits below the logical width are always zero.
    pub fn justify(self, level: f64) -> i32 {
        match self {
            BitDepth::Bits16 => {
                let s = level.round().clamp(i16::MIN as f64, i16::MAX as f64) as i32;
                s << 16
            }
            BitDepth::Bits24 => {
                let s = (level * 256.0).round().clamp(-8_388_608.0, 8_388_607.0) as i32;
                s << 8
            }
            BitDepth::Bits32 => {
                (level * 65_536.0)
                    .round()
                    .clamp(i32::MIN as f64, i32::MAX as f64) as i32
            }
        }
    }

    /// Recover the logical sample from a left-justified container.
    pub fn unjustify(self, container: i32) -> i32 {
        container >> (32 - u32::from(self.bits()))
    }
}

/// Order of the two slots inside an interleaved frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelLayout {
    /// Slot 0 carries the right channel, slot 1 the left.
    #[default]
    RightLeft,
    /// Slot 0 carries the left channel, slot 1 the right.
    LeftRight,
}

impl ChannelLayout {
    pub fn frame(self, left: i32, right: i32) -> [i32; CHANNELS] {
        match self {
            ChannelLayout::RightLeft => [right, left],
            ChannelLayout::LeftRight => [left, right],
        }
    }

    pub fn left_slot(self) -> usize {
        match self {
            ChannelLayout::RightLeft => 1,
            ChannelLayout::LeftRight => 0,
        }
    }

    pub fn right_slot(self) -> usize {
        1 - self.left_slot()
    }
}

/// Stream format a sink is configured for. Fixed for the sink's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkFormat {
    /// Frames per second.
    pub sample_rate: u32,
    pub bits_per_sample: BitDepth,
    pub layout: ChannelLayout,
}

impl SinkFormat {
    pub fn channels(&self) -> u16 {
        CHANNELS as u16
    }

    pub fn bytes_for_frames(&self, frames: usize) -> usize {
        frames * BYTES_PER_FRAME
    }

    /// Wall-clock duration of `frames` frames at this format's rate.
    pub fn duration_of(&self, frames: usize) -> Duration {
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

/// The audio output the transmitter drives.
///
/// Implementations stand in for an I2S driver: a bounded queue in front of a
/// fixed-rate clock. They must be `Send` because the transmitter thread owns
/// them for the whole session.
pub trait AudioSink: Send + 'static {
    /// The format this sink was opened with.
    fn format(&self) -> SinkFormat;

    /// Queue `bytes` (whole interleaved frames) for output, waiting at most
    /// `timeout` for room.
    ///
    /// # Returns
    /// The number of bytes accepted. Fewer than `bytes.len()` is a short
    /// transfer; the caller decides what to do with the remainder.
    ///
    /// # Errors
    /// `SinkError::Timeout` when nothing could be queued before the deadline.
    fn send(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize, SinkError>;
}

impl<S: AudioSink + ?Sized> AudioSink for Box<S> {
    fn format(&self) -> SinkFormat {
        (**self).format()
    }

    fn send(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize, SinkError> {
        (**self).send(bytes, timeout)
    }
}

/// Decode interleaved little-endian containers back into samples.
pub(crate) fn decode_containers(bytes: &[u8]) -> Result<Vec<i32>, SinkError> {
    let mut out = Vec::with_capacity(bytes.len() / BYTES_PER_SAMPLE);
    decode_containers_into(bytes, &mut out)?;
    Ok(out)
}

/// Decode into `out`, reusing its allocation. `out` is left untouched on error.
pub(crate) fn decode_containers_into(
    bytes: &[u8],
    out: &mut Vec<i32>,
) -> Result<(), SinkError> {
    if bytes.len() % BYTES_PER_FRAME != 0 {
        return Err(SinkError::Misaligned { len: bytes.len() });
    }
    out.clear();
    out.extend(
        bytes
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
    );
    Ok(())
}
