use std::time::Duration;

/// Capped exponential backoff used between reconnect attempts.
///
/// `delay(attempt)` is `base * 2^min(attempt, max_attempt)`, never more than
/// `max_delay`. No jitter: the same attempt always yields the same delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max_delay: Duration,
    max_attempt: u32,
}

impl Backoff {
    pub const DEFAULT_BASE: Duration = Duration::from_secs(2);
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5 * 60);
    pub const DEFAULT_MAX_ATTEMPT: u32 = 10;

    pub fn new(base: Duration, max_delay: Duration, max_attempt: u32) -> Self {
        Backoff {
            base,
            max_delay,
            max_attempt,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(self.max_attempt);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(
            Self::DEFAULT_BASE,
            Self::DEFAULT_MAX_DELAY,
            Self::DEFAULT_MAX_ATTEMPT,
        )
    }
}
