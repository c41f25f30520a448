use std::time::Duration;

/// Doubling delay used while a stream call is being throttled.
///
/// Yields `base`, `2 * base`, `4 * base`, ... and holds at
/// `base * max_multiplier` once the cap is reached.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    multiplier: u32,
    max_multiplier: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_multiplier: u32) -> Self {
        Self {
            base,
            multiplier: 1,
            max_multiplier: max_multiplier.max(1),
        }
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.base.saturating_mul(self.multiplier);
        self.multiplier =
            self.multiplier.saturating_mul(2).min(self.max_multiplier);
        delay
    }

    pub fn reset(&mut self) {
        self.multiplier = 1;
    }

    pub fn max_delay(&self) -> Duration {
        self.base.saturating_mul(self.max_multiplier)
    }
}
