mod settings;

use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::broadcast::error::RecvError;
use tonestream_core::{EngineConfig, ToneEngine};
use tracing::{info, warn};

use settings::{default_settings_path, load_settings, AppSettings};

const DIAGNOSTICS_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tonestream=info")),
        )
        .init();

    info!("tonestream starting");

    let settings_path = default_settings_path();
    let app_settings = load_settings(&settings_path);
    let config = app_settings.engine_config();
    info!(
        settings_path = ?settings_path,
        sample_rate = config.sample_rate,
        wave_freq_hz = config.wave_freq_hz,
        frames_per_block = config.frames_per_block,
        bits = config.bit_depth.bits(),
        waveform = ?config.waveform,
        "runtime settings loaded"
    );

    let engine = ToneEngine::new(config.clone());
    forward_status(&engine);

    // ── Output ────────────────────────────────────────────────────────────
    #[cfg(feature = "audio-cpal")]
    let output = start_device(&engine, &config, &app_settings)?;
    #[cfg(not(feature = "audio-cpal"))]
    start_wav(&engine, &config, &app_settings)?;

    run(&engine, app_settings.run_seconds);

    engine.stop()?;
    #[cfg(feature = "audio-cpal")]
    output.stop();

    let snap = engine.diagnostics_snapshot();
    info!(
        blocks_sent = snap.blocks_sent,
        bytes_written = snap.bytes_written,
        late_blocks = snap.late_blocks,
        "tonestream finished"
    );
    Ok(())
}

#[cfg(not(feature = "audio-cpal"))]
fn start_wav(
    engine: &ToneEngine,
    config: &EngineConfig,
    app_settings: &AppSettings,
) -> anyhow::Result<()> {
    use tonestream_core::WavSink;

    let sink = WavSink::create(&app_settings.wav_path, config.sink_format())?;
    engine.start(sink)?;
    if app_settings.run_seconds.is_none() {
        warn!("no runSeconds set; the WAV file grows until the process is killed");
    }
    Ok(())
}

#[cfg(feature = "audio-cpal")]
fn start_device(
    engine: &ToneEngine,
    config: &EngineConfig,
    app_settings: &AppSettings,
) -> anyhow::Result<tonestream_core::DeviceOutput> {
    use std::sync::{atomic::AtomicBool, Arc};
    use tonestream_core::{create_ring_sink, DeviceOutput};

    let (sink, drain) = create_ring_sink(config.sink_format(), config.queue_frames);
    let playing = Arc::new(AtomicBool::new(true));
    let output = DeviceOutput::open_with_preference(
        drain,
        playing,
        app_settings.preferred_output_device.as_deref(),
    )?;
    info!(device = %output.device_name, channels = output.device_channels, "output device open");
    engine.start(sink)?;
    Ok(output)
}

/// Log status transitions from a background thread.
fn forward_status(engine: &ToneEngine) {
    let mut rx = engine.subscribe_status();
    let spawned = thread::Builder::new()
        .name("tonestream-status".into())
        .spawn(move || loop {
            match rx.blocking_recv() {
                Ok(ev) => info!(status = ?ev.status, detail = ?ev.detail, "engine status"),
                Err(RecvError::Lagged(n)) => warn!("status forwarder lagged by {n} events"),
                Err(RecvError::Closed) => break,
            }
        });
    if let Err(e) = spawned {
        warn!("status forwarder not started: {e}");
    }
}

/// Block the main thread, logging diagnostics until `run_seconds` elapses.
fn run(engine: &ToneEngine, run_seconds: Option<u64>) {
    let started = Instant::now();
    let deadline = run_seconds.map(Duration::from_secs);

    loop {
        let remaining = deadline.map(|d| d.saturating_sub(started.elapsed()));
        let nap = remaining.map_or(DIAGNOSTICS_INTERVAL, |r| r.min(DIAGNOSTICS_INTERVAL));
        thread::sleep(nap);

        let snap = engine.diagnostics_snapshot();
        info!(
            blocks_generated = snap.blocks_generated,
            blocks_sent = snap.blocks_sent,
            bytes_written = snap.bytes_written,
            transfer_timeouts = snap.transfer_timeouts,
            partial_transfers = snap.partial_transfers,
            sync_timeouts = snap.sync_timeouts,
            late_blocks = snap.late_blocks,
            sink_errors = snap.sink_errors,
            max_generation_us = snap.max_generation_us,
            active = ?engine.active_index(),
            "stream diagnostics"
        );

        if deadline.is_some_and(|d| started.elapsed() >= d) {
            break;
        }
    }
}
