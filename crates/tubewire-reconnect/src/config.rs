//! Backoff configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// How reconnect delays grow after failures.
///
/// The defaults retry after about a second, multiply the delay by *e* on
/// every further failure, cap it at one hour, and spread each delay by
/// roughly 12% so that many clients dropped at once don't reconnect in
/// lockstep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry, and the floor the delay resets to
    /// after a successful connect.
    pub initial: Duration,
    /// Upper bound for any delay, jitter included.
    pub max: Duration,
    /// Multiplier applied after each failed attempt. Must be ≥ 1.
    pub factor: f64,
    /// Fraction of the delay used as uniform jitter (0.0–1.0).
    /// A delay `d` becomes a value in `d * (1 - jitter) ..= d * (1 + jitter)`.
    pub jitter: f64,
    /// Consecutive failures tolerated before giving up.
    /// `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(3600),
            factor: std::f64::consts::E,
            jitter: 0.119_626_564_72,
            max_retries: None,
        }
    }
}

impl BackoffConfig {
    /// A fixed schedule with no jitter: `initial`, `initial * factor`, …
    /// Handy for tests and for servers on the same host.
    pub fn fixed(initial: Duration, factor: f64, max: Duration) -> Self {
        Self {
            initial,
            max,
            factor,
            jitter: 0.0,
            max_retries: None,
        }
    }

    /// Sets the retry limit.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// Called automatically when a supervisor is spawned. Rules:
    /// - `factor` below 1 (or not finite) becomes 1.
    /// - `jitter` clamped to `0.0..=1.0`.
    /// - `max` raised to `initial` if it is smaller.
    pub fn validated(mut self) -> Self {
        if !self.factor.is_finite() || self.factor < 1.0 {
            warn!(factor = self.factor, "backoff factor below 1, using 1");
            self.factor = 1.0;
        }
        if !self.jitter.is_finite() {
            self.jitter = 0.0;
        }
        self.jitter = self.jitter.clamp(0.0, 1.0);
        if self.max < self.initial {
            warn!(
                initial = ?self.initial,
                max = ?self.max,
                "backoff max below initial, raising it"
            );
            self.max = self.initial;
        }
        self
    }
}
