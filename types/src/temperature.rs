//! Sampling temperature carried between generation cycles.

/// Requested sampling temperature for the next generation round.
///
/// Zero means greedy decoding. A cycle that yields no surviving facts
/// raises the next cycle's temperature by a fixed step so the model can
/// escape a stuck distribution; the first cycle with survivors snaps it
/// back to zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Temperature(f32);

impl Temperature {
    pub const ZERO: Self = Self(0.0);

    #[must_use]
    pub fn new(value: f32) -> Self {
        Self(value.max(0.0))
    }

    #[must_use]
    pub fn value(self) -> f32 {
        self.0
    }

    /// Greedy decoding requested, no distribution sampling.
    #[must_use]
    pub fn is_greedy(self) -> bool {
        self.0 <= f32::EPSILON
    }

    /// Raises the temperature by `step`, clamped to `cap`.
    pub fn escalate(&mut self, step: f32, cap: f32) {
        self.0 = (self.0 + step).min(cap);
    }

    pub fn reset(&mut self) {
        self.0 = 0.0;
    }
}
