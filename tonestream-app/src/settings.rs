//! Host settings (JSON file next to the binary or named by `TONESTREAM_SETTINGS`).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tonestream_core::{BitDepth, ChannelLayout, EngineConfig, OutputWaveform};

const SETTINGS_ENV: &str = "TONESTREAM_SETTINGS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_output_device: Option<String>,
    pub sample_rate: u32,
    pub wave_freq_hz: f64,
    pub frames_per_block: usize,
    pub bit_depth: BitDepth,
    pub waveform: OutputWaveform,
    pub layout: ChannelLayout,
    pub transfer_timeout_ms: u64,
    pub sync_timeout_ms: u64,
    pub startup_delay_ms: u64,
    pub queue_frames: usize,
    /// Output file when no playback device is compiled in.
    pub wav_path: String,
    /// Stop after this many seconds; `None` streams until killed.
    pub run_seconds: Option<u64>,
}

impl Default for AppSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            preferred_output_device: None,
            sample_rate: engine.sample_rate,
            wave_freq_hz: engine.wave_freq_hz,
            frames_per_block: engine.frames_per_block,
            bit_depth: engine.bit_depth,
            waveform: engine.waveform,
            layout: engine.layout,
            transfer_timeout_ms: engine.transfer_timeout_ms,
            sync_timeout_ms: engine.sync_timeout_ms,
            startup_delay_ms: engine.startup_delay_ms,
            queue_frames: engine.queue_frames,
            wav_path: "tonestream.wav".into(),
            run_seconds: None,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.sample_rate = self.sample_rate.clamp(8_000, 192_000);
        let nyquist = self.sample_rate as f64 / 2.0;
        if !self.wave_freq_hz.is_finite() {
            self.wave_freq_hz = EngineConfig::default().wave_freq_hz;
        }
        self.wave_freq_hz = self.wave_freq_hz.clamp(1.0, nyquist - 1.0);
        self.frames_per_block = self.frames_per_block.clamp(32, 8_192);
        self.transfer_timeout_ms = self.transfer_timeout_ms.clamp(10, 5_000);
        self.sync_timeout_ms = self.sync_timeout_ms.clamp(10, 5_000);
        self.startup_delay_ms = self.startup_delay_ms.min(5_000);
        self.queue_frames = self
            .queue_frames
            .clamp(2 * self.frames_per_block, 1 << 20);
        self.wav_path = self.wav_path.trim().to_string();
        if self.wav_path.is_empty() {
            self.wav_path = "tonestream.wav".into();
        }
        self.run_seconds = self.run_seconds.filter(|&s| s > 0);
        self.preferred_output_device = self
            .preferred_output_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            sample_rate: self.sample_rate,
            wave_freq_hz: self.wave_freq_hz,
            frames_per_block: self.frames_per_block,
            bit_depth: self.bit_depth,
            waveform: self.waveform,
            layout: self.layout,
            transfer_timeout_ms: self.transfer_timeout_ms,
            sync_timeout_ms: self.sync_timeout_ms,
            startup_delay_ms: self.startup_delay_ms,
            queue_frames: self.queue_frames,
        }
    }
}

pub fn default_settings_path() -> PathBuf {
    std::env::var_os(SETTINGS_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("tonestream.json"))
}

/// Missing or unreadable files fall back to defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}
