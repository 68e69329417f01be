//! Reconnect backoff
//!
//! Delay for attempt `n` is `min(base * factor^(n-1) * jitter, max)` with
//! jitter drawn uniformly from `[1 - j, 1 + j]`. The attempt counter resets
//! when a session opens and the policy gives up once the ceiling is hit.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{FeedError, FeedResult};

/// Reconnect timing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Growth factor per attempt
    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Relative jitter (0.15 = ±15%)
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Upper bound on any delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Reconnect attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    5000
}

fn default_factor() -> f64 {
    1.5
}

fn default_jitter() -> f64 {
    0.15
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    10
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            factor: default_factor(),
            jitter: default_jitter(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect `attempt` (1-based) for a given jitter multiplier
    pub fn delay_for(&self, attempt: u32, jitter_factor: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.base_delay_ms as f64 * self.factor.powi(exponent) * jitter_factor;
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Draw a jitter multiplier
    pub fn sample_jitter(&self) -> f64 {
        if self.jitter <= 0.0 {
            return 1.0;
        }
        rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter))
    }

    pub fn validate(&self) -> FeedResult<()> {
        if self.factor < 1.0 {
            return Err(FeedError::ConfigError(format!(
                "reconnect factor must be >= 1, got {}",
                self.factor
            )));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(FeedError::ConfigError(format!(
                "reconnect jitter must be in [0, 1), got {}",
                self.jitter
            )));
        }
        if self.max_attempts == 0 {
            return Err(FeedError::ConfigError(
                "reconnect max_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of a disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStep {
    /// Wait `delay`, then make reconnect `attempt`
    Retry { attempt: u32, delay: Duration },
    /// Ceiling reached, stop reconnecting
    GiveUp { attempts: u32 },
}

/// Attempt counter driven by session open/close
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// Reconnect attempts made since the last open session
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// A session opened successfully
    pub fn on_open(&mut self) {
        self.attempts = 0;
    }

    /// A session closed or failed to open
    pub fn on_disconnect(&mut self) -> BackoffStep {
        if self.attempts >= self.policy.max_attempts {
            return BackoffStep::GiveUp {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        let delay = self
            .policy
            .delay_for(self.attempts, self.policy.sample_jitter());
        BackoffStep::Retry {
            attempt: self.attempts,
            delay,
        }
    }
}
