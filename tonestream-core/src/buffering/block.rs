//! Fixed-size block of interleaved stereo frames.

use crate::audio::{BYTES_PER_FRAME, CHANNELS};

/// One ping-pong slot: `len()` frames of two 32-bit containers each.
///
/// Whoever holds the value owns the slot; blocks move between the workers
/// rather than being shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBlock {
    index: u8,
    generation: Option<u64>,
    frames: Vec<[i32; CHANNELS]>,
}

impl SampleBlock {
    /// A zeroed, never-filled block for slot `index`.
    pub fn new(index: u8, frames: usize) -> Self {
        Self {
            index,
            generation: None,
            frames: vec![[0; CHANNELS]; frames],
        }
    }

    /// Buffer slot this block occupies (0 or 1).
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Fill pass that produced the current contents, `None` while still zeroed.
    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    pub fn is_filled(&self) -> bool {
        self.generation.is_some()
    }

    pub(crate) fn mark_filled(&mut self, generation: u64) {
        self.generation = Some(generation);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[[i32; CHANNELS]] {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut [[i32; CHANNELS]] {
        &mut self.frames
    }

    /// Samples of one interleave slot, in frame order.
    pub fn slot(&self, slot: usize) -> impl Iterator<Item = i32> + '_ {
        self.frames.iter().map(move |f| f[slot])
    }

    pub fn byte_len(&self) -> usize {
        self.frames.len() * BYTES_PER_FRAME
    }

    /// Serialize to interleaved little-endian bytes, replacing `out`'s
    /// contents. `out` keeps its allocation between calls.
    pub fn write_le_bytes(&self, out: &mut Vec<u8>) {
        out.clear();
        out.reserve(self.byte_len());
        for frame in &self.frames {
            for sample in frame {
                out.extend_from_slice(&sample.to_le_bytes());
            }
        }
    }
}
