use std::time::Duration;
use tracing::debug;

/// Exponential retry delay with a ceiling.
///
/// The delay returned by [`Backoff::next_delay`] is the one to sleep now; the
/// stored delay then grows by `factor`, clamped to `max_delay`. Between two
/// calls to [`Backoff::reset`] the sequence never decreases and never exceeds
/// the ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    current_delay: Duration,
    base_delay: Duration,
    max_delay: Duration,
    factor: u32,
}

impl Backoff {
    pub fn new(base_delay: Duration, factor: u32, max_delay: Duration) -> Self {
        let base_delay = base_delay.min(max_delay);
        Self {
            current_delay: base_delay,
            base_delay,
            max_delay,
            factor: factor.max(1),
        }
    }

    /// Receive-loop policy: 1s, ×10, capped at ten minutes
    pub fn for_transport() -> Self {
        Self::new(Duration::from_millis(1000), 10, Duration::from_millis(600_000))
    }

    /// Sensor polling policy: 200ms, doubling, capped at two seconds
    pub fn for_sensor_polling() -> Self {
        Self::new(Duration::from_millis(200), 2, Duration::from_millis(2000))
    }

    /// Delay to wait now; advances the stored delay for the next failure
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay;
        self.current_delay = self
            .current_delay
            .checked_mul(self.factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        debug!(
            "Backoff delay {:?}, next {:?}",
            delay, self.current_delay
        );
        delay
    }

    /// Back to the base delay after a success
    pub fn reset(&mut self) {
        self.current_delay = self.base_delay;
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn is_at_base(&self) -> bool {
        self.current_delay == self.base_delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::for_transport()
    }
}
