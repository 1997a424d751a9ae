/// Phase and ramp carried from one block to the next.
///
/// `phase` is in radians and always within `[0, 2π)`; `triangle` is the last
/// ramp level in 16-bit units, within ±2^15 / 4.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OscillatorState {
    pub(crate) phase: f64,
    pub(crate) triangle: f64,
}

impl OscillatorState {
    pub const fn new() -> Self {
        Self {
            phase: 0.0,
            triangle: 0.0,
        }
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn triangle(&self) -> f64 {
        self.triangle
    }
}
