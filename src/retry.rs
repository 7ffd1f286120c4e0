use std::time::Duration;

/// Base delay used when a request leaves `retry_delay` at zero.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

// 2^16 times the base delay is already far past any sane wait.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// How the wait between attempts grows.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DelayStrategy {
    /// Wait exactly the base delay every time.
    #[default]
    Fixed,
    /// Double the base delay after each failed attempt.
    ExponentialBackoff,
}

impl DelayStrategy {
    /// Wait before the attempt that follows failure number `failures`
    /// (1-based).
    pub fn delay_for(self, base: Duration, failures: u32) -> Duration {
        match self {
            Self::Fixed => base,
            Self::ExponentialBackoff => {
                let shift = failures.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
                base.saturating_mul(1u32 << shift)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::DelayStrategy;

    #[test]
    fn fixed_delay_never_grows() {
        let base = Duration::from_millis(50);
        for failures in 1..6 {
            assert_eq!(DelayStrategy::Fixed.delay_for(base, failures), base);
        }
    }

    #[test]
    fn exponential_backoff_doubles_from_base() {
        let base = Duration::from_millis(50);
        let strategy = DelayStrategy::ExponentialBackoff;
        assert_eq!(strategy.delay_for(base, 1), Duration::from_millis(50));
        assert_eq!(strategy.delay_for(base, 2), Duration::from_millis(100));
        assert_eq!(strategy.delay_for(base, 3), Duration::from_millis(200));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let base = Duration::from_millis(1);
        let strategy = DelayStrategy::ExponentialBackoff;
        assert_eq!(
            strategy.delay_for(base, 1_000),
            strategy.delay_for(base, 17)
        );
        assert_eq!(
            strategy.delay_for(Duration::MAX, 10),
            Duration::MAX
        );
    }
}
