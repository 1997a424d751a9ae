//! WAV file sink via `hound`.
//!
//! Writes each block at the format's logical bit depth, so a 16-bit stream
//! produces a 16-bit file. Never blocks; the timeout is ignored. Dropping the
//! sink finalizes the file (hound patches the header on drop).

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::info;

use super::{decode_containers, AudioSink, SinkFormat, CHANNELS};
use crate::error::{Result, SinkError};

pub struct WavSink<W: Write + Seek> {
    writer: Option<WavWriter<W>>,
    format: SinkFormat,
    frames_written: u64,
}

impl WavSink<BufWriter<File>> {
    /// Create (or truncate) a WAV file at `path`.
    pub fn create(path: impl AsRef<Path>, format: SinkFormat) -> Result<Self> {
        let path = path.as_ref();
        let writer = WavWriter::create(path, spec_for(&format))?;
        info!(path = %path.display(), bits = format.bits_per_sample.bits(), "WAV sink opened");
        Ok(Self::from_writer(writer, format))
    }
}

impl<W: Write + Seek> WavSink<W> {
    /// Wrap an arbitrary seekable writer.
    pub fn new(inner: W, format: SinkFormat) -> Result<Self> {
        let writer = WavWriter::new(inner, spec_for(&format))?;
        Ok(Self::from_writer(writer, format))
    }

    fn from_writer(writer: WavWriter<W>, format: SinkFormat) -> Self {
        Self {
            writer: Some(writer),
            format,
            frames_written: 0,
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Patch the WAV header and close the file. Further sends fail with
    /// `SinkError::Closed`.
    pub fn finalize(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

impl<W: Write + Seek + Send + 'static> AudioSink for WavSink<W> {
    fn format(&self) -> SinkFormat {
        self.format
    }

    fn send(&mut self, bytes: &[u8], _timeout: Duration) -> std::result::Result<usize, SinkError> {
        let samples = decode_containers(bytes)?;
        let depth = self.format.bits_per_sample;
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        for container in &samples {
            writer.write_sample(depth.unjustify(*container))?;
        }
        self.frames_written += (samples.len() / CHANNELS) as u64;
        Ok(bytes.len())
    }
}

fn spec_for(format: &SinkFormat) -> WavSpec {
    WavSpec {
        channels: format.channels(),
        sample_rate: format.sample_rate,
        bits_per_sample: format.bits_per_sample.bits(),
        sample_format: SampleFormat::Int,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{BitDepth, ChannelLayout};

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("tonestream-{}-{name}.wav", std::process::id()))
    }

    fn write_and_read_back(depth: BitDepth, levels: &[f64]) -> (hound::WavSpec, Vec<i32>) {
        let format = SinkFormat {
            sample_rate: 48_000,
            bits_per_sample: depth,
            layout: ChannelLayout::RightLeft,
        };
        let path = temp_path(&format!("rt{}", depth.bits()));
        let mut sink = WavSink::create(&path, format).unwrap();

        let bytes: Vec<u8> = levels
            .iter()
            .flat_map(|&l| {
                let c = depth.justify(l);
                [c, c]
            })
            .flat_map(|c| c.to_le_bytes())
            .collect();
        assert_eq!(sink.send(&bytes, Duration::ZERO).unwrap(), bytes.len());
        assert_eq!(sink.frames_written(), levels.len() as u64);
        sink.finalize().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        let samples = reader.samples::<i32>().map(|s| s.unwrap()).collect();
        let _ = std::fs::remove_file(&path);
        (spec, samples)
    }

    #[test]
    fn sixteen_bit_file_holds_logical_samples() {
        let (spec, samples) = write_and_read_back(BitDepth::Bits16, &[0.0, 1000.0, -1000.0]);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.channels, 2);
        assert_eq!(samples, vec![0, 0, 1000, 1000, -1000, -1000]);
    }

    #[test]
    fn twenty_four_bit_file_scales_up() {
        let (spec, samples) = write_and_read_back(BitDepth::Bits24, &[1000.0]);
        assert_eq!(spec.bits_per_sample, 24);
        assert_eq!(samples, vec![256_000, 256_000]);
    }

    #[test]
    fn thirty_two_bit_file_keeps_full_container() {
        let (spec, samples) = write_and_read_back(BitDepth::Bits32, &[-1.0]);
        assert_eq!(spec.bits_per_sample, 32);
        assert_eq!(samples, vec![-65_536, -65_536]);
    }

    #[test]
    fn send_after_finalize_reports_closed() {
        let format = SinkFormat {
            sample_rate: 8_000,
            bits_per_sample: BitDepth::Bits16,
            layout: ChannelLayout::LeftRight,
        };
        let path = temp_path("closed");
        let mut sink = WavSink::create(&path, format).unwrap();
        sink.finalize().unwrap();
        let err = sink.send(&[0u8; 8], Duration::ZERO).unwrap_err();
        assert!(matches!(err, SinkError::Closed));
        let _ = std::fs::remove_file(&path);
    }
}
