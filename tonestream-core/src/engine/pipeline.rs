//! The two blocking worker loops.
//!
//! ## Transmitter (per cycle)
//!
//! ```text
//! 1. Take the next prepared block (wait at most one block duration,
//!    otherwise send silence and count a late block)
//! 2. Record its slot as the active index
//! 3. Return the previously transmitted block to the generator, signal
//! 4. Send the block to the sink with the transfer timeout
//! 5. Hold on to it until the next cycle
//! ```
//!
//! ## Generator (per wakeup)
//!
//! ```text
//! 1. Wait for the handoff permit (timeout → count, log, retry)
//! 2. Fill every block that has been handed back, queue it for sending
//! ```
//!
//! A slot is returned only after its transfer finished, so the refill of
//! slot `k` is always ordered after the send of `k`. The real-time
//! requirement that remains is that one fill completes within one block's
//! playback time; fills that take longer are counted and logged.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use crate::{
    audio::{AudioSink, BYTES_PER_FRAME},
    buffering::{ActiveIndex, BlockReceiver, BlockSender, SampleBlock},
    error::{SinkError, StreamFault},
    events::{StreamEvent, StreamEventKind},
    handoff::HandoffSignal,
    synth::WaveformGenerator,
};

#[derive(Default)]
pub struct StreamDiagnostics {
    pub blocks_generated: AtomicUsize,
    pub blocks_sent: AtomicUsize,
    pub bytes_written: AtomicUsize,
    pub transfer_timeouts: AtomicUsize,
    pub partial_transfers: AtomicUsize,
    pub sync_timeouts: AtomicUsize,
    pub late_blocks: AtomicUsize,
    pub idle_permits: AtomicUsize,
    pub sink_errors: AtomicUsize,
    pub slow_fills: AtomicUsize,
    pub max_generation_us: AtomicU64,
}

impl StreamDiagnostics {
    pub fn reset(&self) {
        self.blocks_generated.store(0, Ordering::Relaxed);
        self.blocks_sent.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
        self.transfer_timeouts.store(0, Ordering::Relaxed);
        self.partial_transfers.store(0, Ordering::Relaxed);
        self.sync_timeouts.store(0, Ordering::Relaxed);
        self.late_blocks.store(0, Ordering::Relaxed);
        self.idle_permits.store(0, Ordering::Relaxed);
        self.sink_errors.store(0, Ordering::Relaxed);
        self.slow_fills.store(0, Ordering::Relaxed);
        self.max_generation_us.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            blocks_generated: self.blocks_generated.load(Ordering::Relaxed),
            blocks_sent: self.blocks_sent.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            transfer_timeouts: self.transfer_timeouts.load(Ordering::Relaxed),
            partial_transfers: self.partial_transfers.load(Ordering::Relaxed),
            sync_timeouts: self.sync_timeouts.load(Ordering::Relaxed),
            late_blocks: self.late_blocks.load(Ordering::Relaxed),
            idle_permits: self.idle_permits.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
            slow_fills: self.slow_fills.load(Ordering::Relaxed),
            max_generation_us: self.max_generation_us.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_fill(&self, elapsed: Duration) {
        self.blocks_generated.fetch_add(1, Ordering::Relaxed);
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.max_generation_us.fetch_max(us, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub blocks_generated: usize,
    pub blocks_sent: usize,
    pub bytes_written: usize,
    pub transfer_timeouts: usize,
    pub partial_transfers: usize,
    pub sync_timeouts: usize,
    pub late_blocks: usize,
    pub idle_permits: usize,
    pub sink_errors: usize,
    pub slow_fills: usize,
    pub max_generation_us: u64,
}

/// Broadcast sender plus the sequence counter both workers share.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<StreamEvent>,
    seq: Arc<AtomicU64>,
}

impl EventEmitter {
    pub fn new(tx: broadcast::Sender<StreamEvent>, seq: Arc<AtomicU64>) -> Self {
        Self { tx, seq }
    }

    pub fn emit(&self, kind: StreamEventKind) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        // No subscribers is fine.
        let _ = self.tx.send(StreamEvent { seq, kind });
    }

    fn fault(&self, fault: &StreamFault) {
        self.emit(StreamEventKind::Fault {
            message: fault.to_string(),
        });
    }
}

/// Everything the generator thread owns.
pub struct GeneratorContext {
    pub generator: WaveformGenerator,
    pub free_rx: BlockReceiver,
    pub filled_tx: BlockSender,
    pub handoff: Arc<HandoffSignal>,
    pub running: Arc<AtomicBool>,
    pub sync_timeout: Duration,
    /// Playback time of one block; fills slower than this break the pipeline.
    pub block_duration: Duration,
    pub events: EventEmitter,
    pub diagnostics: Arc<StreamDiagnostics>,
}

/// Everything the transmitter thread owns.
pub struct TransmitterContext<S: AudioSink> {
    pub sink: S,
    pub filled_rx: BlockReceiver,
    pub free_tx: BlockSender,
    pub handoff: Arc<HandoffSignal>,
    pub active: Arc<ActiveIndex>,
    pub running: Arc<AtomicBool>,
    pub transfer_timeout: Duration,
    pub startup_delay: Duration,
    pub frames_per_block: usize,
    pub block_duration: Duration,
    pub events: EventEmitter,
    pub diagnostics: Arc<StreamDiagnostics>,
}

/// Fill `block`, account for it and announce it. Used for priming as well as
/// by the generator loop.
pub(crate) fn fill_block(
    generator: &mut WaveformGenerator,
    block: &mut SampleBlock,
    block_duration: Duration,
    events: &EventEmitter,
    diagnostics: &StreamDiagnostics,
) {
    let start = Instant::now();
    generator.fill(block);
    let elapsed = start.elapsed();

    diagnostics.record_fill(elapsed);
    if elapsed > block_duration {
        diagnostics.slow_fills.fetch_add(1, Ordering::Relaxed);
        warn!(
            index = block.index(),
            elapsed_us = elapsed.as_micros() as u64,
            budget_us = block_duration.as_micros() as u64,
            "block generation exceeded its playback time"
        );
    }

    events.emit(StreamEventKind::BlockFilled {
        index: block.index(),
        generation: block.generation().unwrap_or_default(),
        elapsed_us: elapsed.as_micros() as u64,
    });
}

/// Run the generator until `ctx.running` becomes false or the transmitter
/// goes away. Returns the generator so its state can be inspected.
pub fn run_generator(mut ctx: GeneratorContext) -> WaveformGenerator {
    info!("generator started");

    loop {
        if !ctx.running.load(Ordering::Acquire) {
            break;
        }

        if let Err(fault) = ctx.handoff.wait(ctx.sync_timeout) {
            if !ctx.running.load(Ordering::Acquire) {
                break;
            }
            ctx.diagnostics.sync_timeouts.fetch_add(1, Ordering::Relaxed);
            warn!("{fault}; transmitter may be stalled, retrying");
            ctx.events.fault(&fault);
            continue;
        }

        let mut filled = 0usize;
        while let Ok(mut block) = ctx.free_rx.try_recv() {
            fill_block(
                &mut ctx.generator,
                &mut block,
                ctx.block_duration,
                &ctx.events,
                &ctx.diagnostics,
            );
            if ctx.filled_tx.send(block).is_err() {
                info!("transmitter gone, generator exiting");
                return ctx.generator;
            }
            filled += 1;
        }

        if filled == 0 {
            ctx.diagnostics.idle_permits.fetch_add(1, Ordering::Relaxed);
            trace!("handoff permit with no block to refill");
        }
    }

    info!(
        generations = ctx.generator.next_generation(),
        "generator stopped"
    );
    ctx.generator
}

/// Run the transmitter until `ctx.running` becomes false. Returns the sink so
/// the caller can finalize it.
pub fn run_transmitter<S: AudioSink>(mut ctx: TransmitterContext<S>) -> S {
    info!(
        frames = ctx.frames_per_block,
        timeout_ms = ctx.transfer_timeout.as_millis() as u64,
        "transmitter started"
    );

    if !ctx.startup_delay.is_zero() {
        std::thread::sleep(ctx.startup_delay);
    }

    let byte_len = ctx.frames_per_block * BYTES_PER_FRAME;
    let silence = vec![0u8; byte_len];
    let mut bytes: Vec<u8> = Vec::with_capacity(byte_len);
    let mut previous: Option<SampleBlock> = None;

    loop {
        // ── 0. Check running flag ─────────────────────────────────────────
        if !ctx.running.load(Ordering::Acquire) {
            break;
        }

        // ── 1. Take the prepared block ────────────────────────────────────
        let current = match ctx.filled_rx.recv_timeout(ctx.block_duration) {
            Ok(block) => Some(block),
            Err(RecvTimeoutError::Timeout) => {
                ctx.diagnostics.late_blocks.fetch_add(1, Ordering::Relaxed);
                warn!("no prepared block ready, sending silence");
                None
            }
            Err(RecvTimeoutError::Disconnected) => {
                info!("generator gone, transmitter exiting");
                break;
            }
        };

        // ── 2. Flip the active index ──────────────────────────────────────
        if let Some(block) = &current {
            if let Some(expected) = ctx.active.generator_index() {
                if block.index() != expected {
                    warn!(
                        got = block.index(),
                        expected, "prepared block arrived out of turn"
                    );
                }
            }
            ctx.active.set(block.index());
        }

        // ── 3. Hand the last transmitted block back, wake the generator ───
        if let Some(done) = previous.take() {
            if ctx.free_tx.send(done).is_err() {
                info!("generator gone, transmitter exiting");
                break;
            }
        }
        ctx.handoff.signal();

        // ── 4. Send ───────────────────────────────────────────────────────
        match &current {
            Some(block) => {
                block.write_le_bytes(&mut bytes);
                let written = transmit(&mut ctx, &bytes);
                ctx.diagnostics.blocks_sent.fetch_add(1, Ordering::Relaxed);
                debug!(
                    index = block.index(),
                    generation = block.generation(),
                    written,
                    "block sent"
                );
                ctx.events.emit(StreamEventKind::BlockSent {
                    index: block.index(),
                    generation: block.generation().unwrap_or_default(),
                    requested: bytes.len(),
                    written,
                });
            }
            None => {
                let written = transmit(&mut ctx, &silence);
                ctx.events.emit(StreamEventKind::SilenceSent {
                    requested: silence.len(),
                    written,
                });
            }
        }

        // ── 5. Keep it until the next cycle ───────────────────────────────
        previous = current;
    }

    ctx.active.clear();
    info!("transmitter stopped");
    ctx.sink
}

/// Push one buffer into the sink and classify the outcome. Never fails:
/// every problem is counted, logged and announced, and the byte count that
/// actually went out is returned.
fn transmit<S: AudioSink>(ctx: &mut TransmitterContext<S>, bytes: &[u8]) -> usize {
    match ctx.sink.send(bytes, ctx.transfer_timeout) {
        Ok(written) => {
            ctx.diagnostics
                .bytes_written
                .fetch_add(written, Ordering::Relaxed);
            if written < bytes.len() {
                let fault = StreamFault::PartialTransfer {
                    written,
                    requested: bytes.len(),
                };
                ctx.diagnostics
                    .partial_transfers
                    .fetch_add(1, Ordering::Relaxed);
                warn!("{fault}");
                ctx.events.fault(&fault);
            }
            written
        }
        Err(SinkError::Timeout(_)) => {
            let fault = StreamFault::TransferTimeout {
                timeout: ctx.transfer_timeout,
            };
            ctx.diagnostics
                .transfer_timeouts
                .fetch_add(1, Ordering::Relaxed);
            warn!("{fault}");
            ctx.events.fault(&fault);
            0
        }
        Err(e) => {
            ctx.diagnostics.sink_errors.fetch_add(1, Ordering::Relaxed);
            error!("sink error: {e}");
            ctx.events.emit(StreamEventKind::Fault {
                message: e.to_string(),
            });
            // A failed sink returns at once; pace the loop at the block rate
            // instead of spinning.
            std::thread::sleep(ctx.block_duration);
            0
        }
    }
}
