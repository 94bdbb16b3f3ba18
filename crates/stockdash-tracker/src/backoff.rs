/*
[INPUT]:  Attempt counter, base delay, ceiling
[OUTPUT]: Exponential delay for reconnection / poll retry
[POS]:    Shared helper for both progress channels
[UPDATE]: When changing retry pacing
*/

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
}

impl Backoff {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling: ceiling.max(base),
        }
    }

    /// Delay before attempt `attempt` (1-based): base, 2x base, 4x base... clamped at the ceiling.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.ceiling)
            .min(self.ceiling)
    }
}
