//! Test-tone synthesis: a phase-accumulated sine and a linear triangle.
//!
//! ## Algorithm (per frame)
//!
//! 1. `sine = sin(phase)`, then `phase += phase_step` and reduce modulo 2π.
//! 2. The triangle ramp rises by `triangle_step` per frame while the new
//!    phase lies outside `[π/2, 3π/2]` and falls by the same amount inside.
//!    Its value is evaluated from the wrapped phase rather than summed, so
//!    a sample that lands exactly on a turn cannot bias the ramp and it never
//!    drifts. The peak is `2^15 / 4`, one quarter cycle of climbing.
//! 3. The selected waveform is left-justified for the configured bit depth
//!    and written to both slots of the frame.
//!
//! `phase_step = 2π·f/fs` and `triangle_step = 2^15 / (fs/f)` are computed
//! once. The oscillator state carries across blocks so the output is
//! continuous at block seams; it is never reset while streaming.

pub mod oscillator;

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};
use tracing::trace;

pub use oscillator::OscillatorState;

use crate::audio::{BitDepth, ChannelLayout};
use crate::buffering::SampleBlock;

/// Full-scale ramp span in 16-bit units.
pub const TRIANGLE_SCALE: f64 = 32_768.0;

/// Peak level of the sine in 16-bit units.
pub const SINE_PEAK: f64 = i16::MAX as f64;

/// Which signal ends up in the output frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputWaveform {
    /// Triangle on both channels.
    #[default]
    Triangle,
    /// Sine on both channels.
    Sine,
    /// Sine on the left channel, triangle on the right.
    Dual,
}

/// One synthesized frame before justification, in 16-bit units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameLevels {
    pub sine: f64,
    pub triangle: f64,
}

/// Owns the oscillator state and fills blocks from it.
#[derive(Debug, Clone)]
pub struct WaveformGenerator {
    phase_step: f64,
    triangle_step: f64,
    waveform: OutputWaveform,
    bit_depth: BitDepth,
    layout: ChannelLayout,
    state: OscillatorState,
    next_generation: u64,
}

impl WaveformGenerator {
    /// # Parameters
    /// - `sample_rate`: output frames per second.
    /// - `wave_freq_hz`: tone frequency; callers validate it is below Nyquist.
    pub fn new(
        sample_rate: u32,
        wave_freq_hz: f64,
        waveform: OutputWaveform,
        bit_depth: BitDepth,
        layout: ChannelLayout,
    ) -> Self {
        let sample_rate = sample_rate as f64;
        let samples_per_cycle = sample_rate / wave_freq_hz;
        Self {
            phase_step: TAU * wave_freq_hz / sample_rate,
            triangle_step: TRIANGLE_SCALE / samples_per_cycle,
            waveform,
            bit_depth,
            layout,
            state: OscillatorState::new(),
            next_generation: 0,
        }
    }

    pub fn phase_step(&self) -> f64 {
        self.phase_step
    }

    pub fn triangle_step(&self) -> f64 {
        self.triangle_step
    }

    pub fn state(&self) -> &OscillatorState {
        &self.state
    }

    pub fn waveform(&self) -> OutputWaveform {
        self.waveform
    }

    pub fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    /// Generation number the next `fill` will stamp.
    pub fn next_generation(&self) -> u64 {
        self.next_generation
    }

    /// Advance the oscillator by one frame.
    #[inline]
    pub fn next_levels(&mut self) -> FrameLevels {
        advance(&mut self.state, self.phase_step, self.triangle_step)
    }

    /// Fill every frame of `block` and stamp it with the next generation.
    pub fn fill(&mut self, block: &mut SampleBlock) {
        let generation = self.next_generation;
        self.next_generation += 1;
        fill_with(
            block,
            &mut self.state,
            self.phase_step,
            self.triangle_step,
            self.waveform,
            self.bit_depth,
            self.layout,
        );
        block.mark_filled(generation);
        trace!(
            index = block.index(),
            generation,
            phase = self.state.phase(),
            triangle = self.state.triangle(),
            "block filled"
        );
    }
}

/// Advance `state` by one frame and return the levels for that frame.
#[inline]
fn advance(state: &mut OscillatorState, phase_step: f64, triangle_step: f64) -> FrameLevels {
    let sine = state.phase.sin() * SINE_PEAK;
    state.phase += phase_step;
    if state.phase >= TAU {
        state.phase -= TAU;
    }

    state.triangle = ramp_at(state.phase, triangle_step / phase_step);

    FrameLevels {
        sine,
        triangle: state.triangle,
    }
}

/// Ramp level at `phase` in `[0, 2π)` for a slope of `per_radian` units.
///
/// Climbs through `[0, π/2)`, falls through `[π/2, 3π/2)` and climbs back to
/// zero through `[3π/2, 2π)`. Continuous at both turns and at the wrap.
#[inline]
fn ramp_at(phase: f64, per_radian: f64) -> f64 {
    use std::f64::consts::{FRAC_PI_2, PI};
    if phase < FRAC_PI_2 {
        phase * per_radian
    } else if phase < 3.0 * FRAC_PI_2 {
        (PI - phase) * per_radian
    } else {
        (phase - TAU) * per_radian
    }
}

/// Fill `block` from an explicit oscillator state.
///
/// This is the stateless core of [`WaveformGenerator::fill`]; it does not
/// touch the block's generation stamp.
pub fn fill_with(
    block: &mut SampleBlock,
    state: &mut OscillatorState,
    phase_step: f64,
    triangle_step: f64,
    waveform: OutputWaveform,
    bit_depth: BitDepth,
    layout: ChannelLayout,
) {
    for frame in block.frames_mut() {
        let levels = advance(state, phase_step, triangle_step);
        let (left, right) = match waveform {
            OutputWaveform::Triangle => (levels.triangle, levels.triangle),
            OutputWaveform::Sine => (levels.sine, levels.sine),
            OutputWaveform::Dual => (levels.sine, levels.triangle),
        };
        *frame = layout.frame(bit_depth.justify(left), bit_depth.justify(right));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn generator(waveform: OutputWaveform, depth: BitDepth) -> WaveformGenerator {
        WaveformGenerator::new(48_000, 657.0, waveform, depth, ChannelLayout::RightLeft)
    }

    #[test]
    fn steps_are_derived_from_rate_and_frequency() {
        let g = generator(OutputWaveform::Triangle, BitDepth::Bits16);
        assert_abs_diff_eq!(g.phase_step(), TAU * 657.0 / 48_000.0, epsilon = 1e-15);
        assert_abs_diff_eq!(g.triangle_step(), 32_768.0 * 657.0 / 48_000.0, epsilon = 1e-9);
    }

    #[test]
    fn consecutive_blocks_match_one_long_block() {
        let mut split = generator(OutputWaveform::Dual, BitDepth::Bits32);
        let mut a = SampleBlock::new(0, 480);
        let mut b = SampleBlock::new(1, 480);
        split.fill(&mut a);
        split.fill(&mut b);

        let mut whole = generator(OutputWaveform::Dual, BitDepth::Bits32);
        let mut long = SampleBlock::new(0, 960);
        whole.fill(&mut long);

        assert_eq!(&long.frames()[..480], a.frames());
        assert_eq!(&long.frames()[480..], b.frames());
        assert_eq!(split.state(), whole.state());
    }

    #[test]
    fn phase_continues_across_block_seam() {
        let mut g = generator(OutputWaveform::Sine, BitDepth::Bits32);
        let mut block = SampleBlock::new(0, 480);
        let mut prev_end = 0.0f64;

        for n in 0..20 {
            g.fill(&mut block);
            let end = g.state().phase();
            let expected = (prev_end + 480.0 * g.phase_step()).rem_euclid(TAU);
            let diff = (end - expected).rem_euclid(TAU);
            let diff = diff.min(TAU - diff);
            assert!(diff < 1e-9, "block {n}: phase {end} vs {expected}");

            // First sample of this block is sin(previous end phase).
            let first = BitDepth::Bits32.unjustify(block.frames()[0][0]) as f64 / 65_536.0;
            assert_abs_diff_eq!(first, prev_end.sin() * SINE_PEAK, epsilon = 1.0 / 65_536.0);
            prev_end = end;
        }
    }

    #[test]
    fn phase_stays_reduced_over_long_runs() {
        let mut g = generator(OutputWaveform::Sine, BitDepth::Bits16);
        for _ in 0..1_000_000 {
            g.next_levels();
            let p = g.state().phase();
            assert!((0.0..TAU).contains(&p), "phase escaped: {p}");
        }
    }

    #[test]
    fn triangle_stays_bounded() {
        let mut g = generator(OutputWaveform::Triangle, BitDepth::Bits16);
        let mut peak = 0.0f64;
        for _ in 0..2_000_000 {
            let t = g.next_levels().triangle;
            assert!(t.abs() <= TRIANGLE_SCALE, "triangle escaped: {t}");
            peak = peak.max(t.abs());
        }
        // A quarter cycle of climbing at 2^15/spc per frame.
        assert!(peak <= TRIANGLE_SCALE / 4.0 + 1e-6, "peak {peak}");
        assert!(peak >= TRIANGLE_SCALE / 4.0 - g.triangle_step(), "peak {peak}");
    }

    #[test]
    fn triangle_does_not_drift_when_samples_land_on_turns() {
        // Samples per cycle divisible by four: frames fall exactly on π/2
        // and 3π/2 every cycle.
        for (rate, freq) in [(48_000, 6_000.0), (48_000, 12_000.0), (8_000, 1_000.0)] {
            let mut g = WaveformGenerator::new(
                rate,
                freq,
                OutputWaveform::Triangle,
                BitDepth::Bits16,
                ChannelLayout::RightLeft,
            );
            let spc = (rate as f64 / freq).round() as usize;
            let first: Vec<f64> = (0..spc).map(|_| g.next_levels().triangle).collect();
            let mut peak = 0.0f64;
            for _ in 0..1_000_000 {
                peak = peak.max(g.next_levels().triangle.abs());
            }
            assert!(peak <= TRIANGLE_SCALE / 4.0 + 1e-6, "{rate}/{freq}: peak {peak}");

            // Re-align to a cycle boundary and compare against the first cycle.
            let offset = (spc - (spc + 1_000_000) % spc) % spc;
            for _ in 0..offset {
                g.next_levels();
            }
            for expected in &first {
                assert_abs_diff_eq!(g.next_levels().triangle, *expected, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn triangle_direction_follows_phase_half_cycles() {
        let mut g = WaveformGenerator::new(
            10_000,
            1_000.0,
            OutputWaveform::Triangle,
            BitDepth::Bits16,
            ChannelLayout::LeftRight,
        );
        // 10 frames per cycle: phase after frame k is (k+1)·36°, so the ramp
        // climbs to 90°, falls until 270° and climbs back to zero at 360°.
        let step = g.triangle_step();
        let ramp: Vec<f64> = (0..10).map(|_| g.next_levels().triangle).collect();
        let expected = [1.0, 2.0, 2.0, 1.0, 0.0, -1.0, -2.0, -2.0, -1.0, 0.0];
        for (got, units) in ramp.iter().zip(expected) {
            assert_abs_diff_eq!(*got, units * step, epsilon = 1e-6);
        }
    }

    #[test]
    fn dual_puts_sine_left_and_triangle_right() {
        let mut g = generator(OutputWaveform::Dual, BitDepth::Bits16);
        let mut block = SampleBlock::new(0, 32);
        g.fill(&mut block);

        let layout = ChannelLayout::RightLeft;
        // Frame 0: sine of phase 0 is silent, triangle already one step up.
        assert_eq!(block.frames()[0][layout.left_slot()], 0);
        assert_eq!(
            BitDepth::Bits16.unjustify(block.frames()[0][layout.right_slot()]),
            g.triangle_step().round() as i32
        );
    }

    #[test]
    fn triangle_mode_is_dual_mono_and_left_justified() {
        let mut g = generator(OutputWaveform::Triangle, BitDepth::Bits16);
        let mut block = SampleBlock::new(0, 480);
        g.fill(&mut block);
        for f in block.frames() {
            assert_eq!(f[0], f[1]);
            assert_eq!(f[0] & 0xFFFF, 0);
        }
    }

    #[test]
    fn fill_stamps_increasing_generations() {
        let mut g = generator(OutputWaveform::Triangle, BitDepth::Bits24);
        let mut block = SampleBlock::new(1, 16);
        g.fill(&mut block);
        assert_eq!(block.generation(), Some(0));
        g.fill(&mut block);
        assert_eq!(block.generation(), Some(1));
        assert_eq!(g.next_generation(), 2);
    }

    #[test]
    fn fill_with_advances_external_state() {
        let mut state = OscillatorState::new();
        let mut block = SampleBlock::new(0, 10);
        let step = TAU / 100.0;
        fill_with(
            &mut block,
            &mut state,
            step,
            1.0,
            OutputWaveform::Triangle,
            BitDepth::Bits32,
            ChannelLayout::LeftRight,
        );
        assert_abs_diff_eq!(state.phase(), 10.0 * step, epsilon = 1e-12);
        assert_abs_diff_eq!(state.triangle(), 10.0, epsilon = 1e-12);
        assert!(!block.is_filled());
    }
}
