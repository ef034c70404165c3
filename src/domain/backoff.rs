//! Bounded, jittered exponential backoff for reconnection attempts.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

/// Backoff parameters, loaded from `config.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    /// First retry delay in milliseconds.
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    /// Cap on the retry delay in milliseconds.
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
    /// Growth factor between consecutive attempts.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Connection attempts per provider before moving to the next one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_ms() -> u64 {
    1_000
}

fn default_max_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            max_ms: default_max_ms(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Exponential backoff state for one provider's retry loop.
///
/// Delays grow geometrically up to the configured cap, with +/-25%
/// uniform jitter so reconnecting clients do not stampede a server
/// that just came back.
#[derive(Debug)]
pub struct Backoff {
    cfg: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(cfg: BackoffConfig) -> Self {
        Self { cfg, attempt: 0 }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// True once the per-provider attempt budget is spent.
    pub fn exhausted(&self) -> bool {
        self.attempt >= self.cfg.max_attempts
    }

    /// Next delay to sleep before retrying, advancing the attempt count.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.cfg.multiplier.powi(self.attempt as i32);
        let raw = (self.cfg.base_ms as f64 * exp).min(self.cfg.max_ms as f64);
        self.attempt = self.attempt.saturating_add(1);

        let jitter = rand::rng().random_range(0.75..=1.25);
        let ms = (raw * jitter).min(self.cfg.max_ms as f64);
        Duration::from_millis(ms as u64)
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
