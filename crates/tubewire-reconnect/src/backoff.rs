//! Exponential backoff state.

use std::time::Duration;

use rand::Rng;

use crate::BackoffConfig;

/// Tracks the delay until the next reconnect attempt.
///
/// [`next_delay`](Self::next_delay) hands out the current delay and then
/// grows it, so the first retry after a [`reset`](Self::reset) always waits
/// the configured floor (give or take jitter).
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    /// Creates a backoff starting at the configured floor.
    pub fn new(config: BackoffConfig) -> Self {
        let config = config.validated();
        Self {
            current: config.initial,
            config,
        }
    }

    /// Returns the delay to wait now and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        let grown = base.as_secs_f64() * self.config.factor;
        self.current = Duration::from_secs_f64(grown.min(self.config.max.as_secs_f64()));
        self.jittered(base)
    }

    /// Returns the delay that `next_delay` will hand out next, before jitter.
    pub fn peek(&self) -> Duration {
        self.current
    }

    /// Drops the delay back to the floor.
    pub fn reset(&mut self) {
        self.current = self.config.initial;
    }

    /// Returns the configuration in use (after validation).
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    fn jittered(&self, base: Duration) -> Duration {
        let jitter = self.config.jitter;
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let scale = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        let secs = (base.as_secs_f64() * scale).min(self.config.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(initial_ms: u64, factor: f64, max_ms: u64) -> Backoff {
        Backoff::new(BackoffConfig::fixed(
            Duration::from_millis(initial_ms),
            factor,
            Duration::from_millis(max_ms),
        ))
    }

    #[test]
    fn test_next_delay_grows_geometrically() {
        let mut backoff = fixed(100, 2.0, 10_000);
        let delays: Vec<_> = (0..4).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800]);
    }

    #[test]
    fn test_next_delay_is_capped_at_max() {
        let mut backoff = fixed(100, 10.0, 1_500);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.next_delay(), Duration::from_millis(1_500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1_500));
    }

    #[test]
    fn test_reset_returns_to_floor() {
        let mut backoff = fixed(250, 3.0, 60_000);
        backoff.next_delay();
        backoff.next_delay();
        assert!(backoff.peek() > Duration::from_millis(250));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut backoff = Backoff::new(BackoffConfig {
            initial: Duration::from_secs(10),
            max: Duration::from_secs(100),
            factor: 1.0,
            jitter: 0.2,
            max_retries: None,
        });
        for _ in 0..200 {
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_secs(8), "{delay:?} too short");
            assert!(delay <= Duration::from_secs(12), "{delay:?} too long");
        }
    }

    #[test]
    fn test_jitter_never_exceeds_max() {
        let mut backoff = Backoff::new(BackoffConfig {
            initial: Duration::from_secs(10),
            max: Duration::from_secs(10),
            factor: 1.0,
            jitter: 0.5,
            max_retries: None,
        });
        for _ in 0..100 {
            assert!(backoff.next_delay() <= Duration::from_secs(10));
        }
    }
}
