//! Playback through a cpal output device.
//!
//! # Design constraints
//!
//! The cpal output callback runs on an OS audio thread at elevated priority.
//! It **must not** allocate after warm-up, block, or perform I/O. It only pops
//! from the [`RingDrain`] (lock-free) and converts containers to the device
//! sample format; an empty queue plays silence and bumps the underrun counter.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms. `DeviceOutput` must be created
//! and dropped on the same thread; only the `RingSink` half crosses into the
//! transmitter thread.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};
use tracing::{error, info, warn};

use super::{RingDrain, CHANNELS};
use crate::error::{Result, ToneError};

/// Handle to an active playback stream. **Not `Send`.**
pub struct DeviceOutput {
    /// Kept alive so the stream is not dropped prematurely.
    _stream: Stream,
    running: Arc<AtomicBool>,
    pub device_name: String,
    pub device_channels: u16,
}

impl DeviceOutput {
    /// Open an output device by preferred name, otherwise fall back to the
    /// default output device and then the first available one.
    pub fn open_with_preference(
        mut drain: RingDrain,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(preferred_name) = preferred_device_name {
            match host.output_devices() {
                Ok(mut devices) => {
                    selected_device = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });

                    if selected_device.is_none() {
                        warn!(
                            "preferred output device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => {
                    warn!("failed to list output devices while resolving preference: {e}");
                }
            }
        }

        let device = if let Some(device) = selected_device {
            device
        } else if let Some(default) = host.default_output_device() {
            default
        } else {
            let mut devices = host
                .output_devices()
                .map_err(|e| ToneError::AudioDevice(e.to_string()))?;
            let fallback = devices.next().ok_or(ToneError::NoDefaultOutputDevice)?;
            warn!("no default output device, falling back to first available output");
            fallback
        };

        let device_name = device.name().unwrap_or_default();
        info!(device = device_name.as_str(), "opening output device");

        let supported = device
            .default_output_config()
            .map_err(|e| ToneError::AudioDevice(e.to_string()))?;

        let format = drain.format();
        let channels = supported.channels().max(1);
        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        info!(
            sample_rate = format.sample_rate,
            channels,
            sample_format = ?supported.sample_format(),
            "output config selected"
        );

        let left = format.layout.left_slot();
        let right = format.layout.right_slot();
        let ch = channels as usize;
        let mut stereo: Vec<i32> = Vec::new();

        // Each branch owns its copy of the flag and converts one device buffer
        // from interleaved 32-bit containers.
        let running_cb = Arc::clone(&running);
        let mut fill = move |frames: usize, write: &mut dyn FnMut(usize, i32)| {
            stereo.resize(frames * CHANNELS, 0);
            if running_cb.load(Ordering::Relaxed) {
                drain.pull(&mut stereo);
            } else {
                stereo.fill(0);
            }
            for f in 0..frames {
                let l = stereo[f * CHANNELS + left];
                let r = stereo[f * CHANNELS + right];
                for c in 0..ch {
                    let v = match c {
                        0 => l,
                        1 => r,
                        _ => ((l as i64 + r as i64) / 2) as i32,
                    };
                    write(f * ch + c, v);
                }
            }
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _info| {
                    fill(data.len() / ch, &mut |i, v| {
                        data[i] = v as f32 / 2_147_483_648.0;
                    });
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),
            SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _info| {
                    fill(data.len() / ch, &mut |i, v| {
                        data[i] = (v >> 16) as i16;
                    });
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),
            SampleFormat::I32 => device.build_output_stream(
                &config,
                move |data: &mut [i32], _info| {
                    fill(data.len() / ch, &mut |i, v| {
                        data[i] = v;
                    });
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),
            fmt => {
                return Err(ToneError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| ToneError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| ToneError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            device_name,
            device_channels: channels,
        })
    }

    /// Open the system default output device.
    pub fn open_default(drain: RingDrain, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(drain, running, None)
    }

    /// Silence the callback on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}
