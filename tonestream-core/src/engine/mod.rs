//! `ToneEngine`, the top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! ToneEngine::new(config)
//!     └─► start(sink)    → validate, prime both slots (status = Priming),
//!                          spawn generator + transmitter (status = Streaming)
//!         └─► stop()     → running=false, generator woken, both joined,
//!                          sink dropped (status = Stopped)
//! ```
//!
//! Calling `start()`/`stop()` in the wrong state returns an error rather than
//! panicking. An engine can be started again after it was stopped; the
//! oscillator starts from phase zero each time.
//!
//! ## Threading
//!
//! Two named OS threads, `tonestream-generator` and `tonestream-transmitter`.
//! On a priority-aware scheduler the generator should be able to preempt the
//! transmitter's bookkeeping, while the transmitter's sink call must never be
//! starved. Priorities are left to the deployment.

pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::{
    audio::{AudioSink, BitDepth, ChannelLayout, SinkFormat},
    buffering::{create_block_queue, ActiveIndex, BufferSet},
    error::{Result, ToneError},
    events::{EngineStatus, EngineStatusEvent, StreamEvent},
    handoff::HandoffSignal,
    synth::{OutputWaveform, WaveformGenerator},
};

use pipeline::{EventEmitter, GeneratorContext, StreamDiagnostics, TransmitterContext};

/// Broadcast channel capacity. Roughly ten seconds of block events at the
/// default block size.
const BROADCAST_CAP: usize = 2048;

/// Configuration for `ToneEngine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Output frames per second. Default: 48000.
    pub sample_rate: u32,
    /// Tone frequency in Hz; must stay below Nyquist. Default: 657.
    pub wave_freq_hz: f64,
    /// Frames per ping-pong slot. Default: 480 (10 ms at 48 kHz).
    pub frames_per_block: usize,
    /// Logical bit depth inside the 32-bit containers. Default: 32.
    pub bit_depth: BitDepth,
    pub waveform: OutputWaveform,
    pub layout: ChannelLayout,
    /// Upper bound on a single sink call. Default: 300 ms.
    pub transfer_timeout_ms: u64,
    /// How long the generator waits for a handoff before counting a
    /// synchronization timeout. Default: 200 ms.
    pub sync_timeout_ms: u64,
    /// Pause between priming and the first transmission. Default: 100 ms.
    pub startup_delay_ms: u64,
    /// Capacity of the software transfer queue in frames, used when the host
    /// builds a `RingSink`. Default: 32 × 960.
    pub queue_frames: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            wave_freq_hz: 657.0,
            frames_per_block: 480,
            bit_depth: BitDepth::Bits32,
            waveform: OutputWaveform::Triangle,
            layout: ChannelLayout::RightLeft,
            transfer_timeout_ms: 300,
            sync_timeout_ms: 200,
            startup_delay_ms: 100,
            queue_frames: 32 * 960,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ToneError::InvalidConfig("sample rate must be non-zero".into()));
        }
        if self.frames_per_block == 0 {
            return Err(ToneError::InvalidConfig("frames per block must be non-zero".into()));
        }
        let nyquist = self.sample_rate as f64 / 2.0;
        if !self.wave_freq_hz.is_finite()
            || self.wave_freq_hz <= 0.0
            || self.wave_freq_hz >= nyquist
        {
            return Err(ToneError::InvalidConfig(format!(
                "tone frequency {} Hz must lie in (0, {nyquist}) Hz",
                self.wave_freq_hz
            )));
        }
        if self.sync_timeout_ms == 0 {
            return Err(ToneError::InvalidConfig("sync timeout must be non-zero".into()));
        }
        if self.queue_frames < self.frames_per_block {
            return Err(ToneError::InvalidConfig(format!(
                "transfer queue ({} frames) cannot hold one block ({} frames)",
                self.queue_frames, self.frames_per_block
            )));
        }
        Ok(())
    }

    /// The format a sink must report to be driven by this configuration.
    pub fn sink_format(&self) -> SinkFormat {
        SinkFormat {
            sample_rate: self.sample_rate,
            bits_per_sample: self.bit_depth,
            layout: self.layout,
        }
    }

    /// Playback time of one block: the deadline for generating the next one.
    pub fn block_duration(&self) -> Duration {
        self.sink_format().duration_of(self.frames_per_block)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    /// A generator in its initial state for this configuration.
    pub fn generator(&self) -> WaveformGenerator {
        WaveformGenerator::new(
            self.sample_rate,
            self.wave_freq_hz,
            self.waveform,
            self.bit_depth,
            self.layout,
        )
    }
}

/// The top-level engine handle.
///
/// `ToneEngine` is `Send + Sync`; all fields use interior mutability, so it
/// can be shared behind an `Arc`.
pub struct ToneEngine {
    config: EngineConfig,
    /// `true` while both workers are live.
    running: Arc<AtomicBool>,
    status: Arc<Mutex<EngineStatus>>,
    event_tx: broadcast::Sender<StreamEvent>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    /// Monotonically increasing event sequence counter.
    seq: Arc<AtomicU64>,
    diagnostics: Arc<StreamDiagnostics>,
    active: Arc<ActiveIndex>,
    handoff: Arc<HandoffSignal>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Serializes `start`/`stop` so a stop never interleaves with a start.
    lifecycle: Mutex<()>,
}

impl ToneEngine {
    /// Create an idle engine. Nothing runs until `start()`.
    pub fn new(config: EngineConfig) -> Self {
        let (event_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            event_tx,
            status_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(StreamDiagnostics::default()),
            active: Arc::new(ActiveIndex::new()),
            handoff: Arc::new(HandoffSignal::new()),
            workers: Mutex::new(Vec::new()),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Prime both slots and start streaming into `sink`.
    ///
    /// Returns once both workers are running. The sink is owned by the
    /// transmitter thread and dropped when the engine stops.
    ///
    /// # Errors
    /// - `ToneError::AlreadyRunning` if already started.
    /// - `ToneError::InvalidConfig` if the configuration is unusable or the
    ///   sink reports a different format.
    /// - `ToneError::WorkerSpawn` if a worker thread could not be created.
    pub fn start<S: AudioSink>(&self, sink: S) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        // Claim the flag before doing any work so concurrent starts cannot
        // both get past this point.
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ToneError::AlreadyRunning);
        }
        if let Err(e) = self.check_sink(&sink) {
            self.running.store(false, Ordering::SeqCst);
            self.set_status(EngineStatus::Error, Some(e.to_string()));
            return Err(e);
        }

        self.diagnostics.reset();
        self.active.clear();
        // Drop any permit left over from a previous run.
        self.handoff.try_wait();

        let events = EventEmitter::new(self.event_tx.clone(), Arc::clone(&self.seq));
        let block_duration = self.config.block_duration();

        // ── Prime ─────────────────────────────────────────────────────────────
        self.set_status(EngineStatus::Priming, None);
        let mut generator = self.config.generator();
        let mut set = BufferSet::new(self.config.frames_per_block);
        set.prime_with(|block| {
            pipeline::fill_block(
                &mut generator,
                block,
                block_duration,
                &events,
                &self.diagnostics,
            )
        });

        let (filled_tx, filled_rx) = create_block_queue();
        let (free_tx, free_rx) = create_block_queue();
        for block in set.into_blocks() {
            // Capacity equals the slot count, so this cannot fail.
            let _ = filled_tx.try_send(block);
        }

        // ── Spawn workers ─────────────────────────────────────────────────────
        let gen_ctx = GeneratorContext {
            generator,
            free_rx,
            filled_tx,
            handoff: Arc::clone(&self.handoff),
            running: Arc::clone(&self.running),
            sync_timeout: self.config.sync_timeout(),
            block_duration,
            events: events.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
        };
        let tx_ctx = TransmitterContext {
            sink,
            filled_rx,
            free_tx,
            handoff: Arc::clone(&self.handoff),
            active: Arc::clone(&self.active),
            running: Arc::clone(&self.running),
            transfer_timeout: self.config.transfer_timeout(),
            startup_delay: self.config.startup_delay(),
            frames_per_block: self.config.frames_per_block,
            block_duration,
            events,
            diagnostics: Arc::clone(&self.diagnostics),
        };

        let generator_handle = match thread::Builder::new()
            .name("tonestream-generator".into())
            .spawn(move || {
                pipeline::run_generator(gen_ctx);
            }) {
            Ok(h) => h,
            Err(source) => return Err(self.abort_start("generator", source, Vec::new())),
        };

        let transmitter_handle = match thread::Builder::new()
            .name("tonestream-transmitter".into())
            .spawn(move || {
                // Dropping the sink here releases the device / finalizes the file.
                drop(pipeline::run_transmitter(tx_ctx));
            }) {
            Ok(h) => h,
            Err(source) => {
                return Err(self.abort_start("transmitter", source, vec![generator_handle]))
            }
        };

        self.workers
            .lock()
            .extend([generator_handle, transmitter_handle]);
        self.set_status(EngineStatus::Streaming, None);
        info!(
            sample_rate = self.config.sample_rate,
            wave_freq_hz = self.config.wave_freq_hz,
            frames_per_block = self.config.frames_per_block,
            bits = self.config.bit_depth.bits(),
            waveform = ?self.config.waveform,
            "engine started, streaming"
        );
        Ok(())
    }

    /// Stop both workers and wait for them to exit.
    ///
    /// # Errors
    /// - `ToneError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(ToneError::NotRunning);
        }
        info!("engine stop requested");

        self.handoff.signal();
        self.join_workers();
        self.active.clear();

        self.set_status(EngineStatus::Stopped, None);
        info!(
            blocks_sent = self.diagnostics.blocks_sent.load(Ordering::Relaxed),
            "engine stopped"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    /// Subscribe to per-block stream events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<StreamEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe to live status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of stream counters for observability.
    pub fn diagnostics_snapshot(&self) -> pipeline::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Slot the transmitter currently holds, `None` when not streaming.
    pub fn active_index(&self) -> Option<u8> {
        self.active.get()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn check_sink<S: AudioSink>(&self, sink: &S) -> Result<()> {
        self.config.validate()?;
        let expected = self.config.sink_format();
        let actual = sink.format();
        if actual != expected {
            return Err(ToneError::InvalidConfig(format!(
                "sink format {actual:?} does not match configured {expected:?}"
            )));
        }
        Ok(())
    }

    fn abort_start(
        &self,
        name: &'static str,
        source: std::io::Error,
        spawned: Vec<JoinHandle<()>>,
    ) -> ToneError {
        self.running.store(false, Ordering::SeqCst);
        self.handoff.signal();
        for handle in spawned {
            let _ = handle.join();
        }
        let err = ToneError::WorkerSpawn { name, source };
        error!("{err}");
        self.set_status(EngineStatus::Error, Some(err.to_string()));
        err
    }

    fn join_workers(&self) {
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let name = handle.thread().name().unwrap_or("worker").to_owned();
            if handle.join().is_err() {
                warn!("{name} thread panicked");
            }
        }
    }

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}

impl Drop for ToneEngine {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            let _ = self.stop();
        }
    }
}
