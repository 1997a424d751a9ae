//! Ping-pong buffer store and the channels that move block ownership.
//!
//! ```text
//!              filled (bounded 2)
//!   Generator ───────────────────► Transmitter ──► AudioSink
//!       ▲                               │
//!       └────────── free (bounded 2) ◄──┘
//! ```
//!
//! A [`SampleBlock`] is moved, never shared: whichever worker holds the value
//! is the only one that can touch it. [`ActiveIndex`] only *records* which
//! slot the transmitter holds, for diagnostics and event consumers.

pub mod block;

use std::sync::atomic::{AtomicU8, Ordering};

use crossbeam_channel::{Receiver, Sender};

pub use block::SampleBlock;

use crate::synth::WaveformGenerator;

/// Number of slots in the ping-pong store.
pub const BUFFER_COUNT: usize = 2;

/// Sending half of a block queue.
pub type BlockSender = Sender<SampleBlock>;

/// Receiving half of a block queue.
pub type BlockReceiver = Receiver<SampleBlock>;

/// Create a queue that can hold every block of the store at once, so a send
/// into it never blocks.
pub fn create_block_queue() -> (BlockSender, BlockReceiver) {
    crossbeam_channel::bounded(BUFFER_COUNT)
}

/// The two slots, before they are handed to the workers.
#[derive(Debug)]
pub struct BufferSet {
    blocks: [SampleBlock; BUFFER_COUNT],
}

impl BufferSet {
    /// Zeroed blocks of `frames_per_block` frames each.
    pub fn new(frames_per_block: usize) -> Self {
        Self {
            blocks: [
                SampleBlock::new(0, frames_per_block),
                SampleBlock::new(1, frames_per_block),
            ],
        }
    }

    /// Generate both slots, index 0 first, so the very first transmission
    /// has real samples in it.
    pub fn prime(&mut self, generator: &mut WaveformGenerator) {
        self.prime_with(|block| generator.fill(block));
    }

    /// Like [`prime`](Self::prime), with the caller doing the filling.
    pub fn prime_with(&mut self, mut fill: impl FnMut(&mut SampleBlock)) {
        for block in self.blocks.iter_mut() {
            fill(block);
        }
    }

    pub fn is_primed(&self) -> bool {
        self.blocks.iter().all(SampleBlock::is_filled)
    }

    pub fn block(&self, index: u8) -> Option<&SampleBlock> {
        self.blocks.get(index as usize)
    }

    /// Give up the store, yielding the blocks in slot order.
    pub fn into_blocks(self) -> [SampleBlock; BUFFER_COUNT] {
        self.blocks
    }
}

/// Which slot the transmitter currently holds. The generator only ever holds
/// the other one.
#[derive(Debug)]
pub struct ActiveIndex(AtomicU8);

impl ActiveIndex {
    const NONE: u8 = u8::MAX;

    pub const fn new() -> Self {
        Self(AtomicU8::new(Self::NONE))
    }

    pub fn set(&self, index: u8) {
        self.0.store(index, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(Self::NONE, Ordering::Release);
    }

    /// `None` before the first transmission and after shutdown.
    pub fn get(&self) -> Option<u8> {
        match self.0.load(Ordering::Acquire) {
            Self::NONE => None,
            i => Some(i),
        }
    }

    /// The slot that belongs to the generator while `get()` is transmitting.
    pub fn generator_index(&self) -> Option<u8> {
        self.get().map(|i| i ^ 1)
    }
}

impl Default for ActiveIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{BitDepth, ChannelLayout};
    use crate::synth::OutputWaveform;

    fn generator() -> WaveformGenerator {
        WaveformGenerator::new(
            48_000,
            657.0,
            OutputWaveform::Triangle,
            BitDepth::Bits16,
            ChannelLayout::RightLeft,
        )
    }

    #[test]
    fn priming_fills_both_slots_in_order() {
        let mut set = BufferSet::new(480);
        assert!(!set.is_primed());

        set.prime(&mut generator());

        assert!(set.is_primed());
        assert_eq!(set.block(0).and_then(SampleBlock::generation), Some(0));
        assert_eq!(set.block(1).and_then(SampleBlock::generation), Some(1));
        assert!(set
            .block(0)
            .map(|b| b.frames().iter().any(|f| f[0] != 0))
            .unwrap_or(false));
    }

    #[test]
    fn into_blocks_keeps_slot_order() {
        let [a, b] = BufferSet::new(8).into_blocks();
        assert_eq!((a.index(), b.index()), (0, 1));
    }

    #[test]
    fn block_queue_holds_both_slots_without_blocking() {
        let (tx, rx) = create_block_queue();
        let [a, b] = BufferSet::new(4).into_blocks();
        tx.try_send(a).unwrap();
        tx.try_send(b).unwrap();
        assert_eq!(rx.try_recv().unwrap().index(), 0);
        assert_eq!(rx.try_recv().unwrap().index(), 1);
    }

    #[test]
    fn active_index_reports_generator_side() {
        let active = ActiveIndex::new();
        assert_eq!(active.get(), None);
        assert_eq!(active.generator_index(), None);
        active.set(1);
        assert_eq!(active.get(), Some(1));
        assert_eq!(active.generator_index(), Some(0));
        active.clear();
        assert_eq!(active.get(), None);
    }
}
