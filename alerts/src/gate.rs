//! Global alert gate
//!
//! A governor GCRA limiter with a burst of one: after a pass, the next one
//! is allowed no sooner than `interval` later. Shared by every sender so
//! all outbound notifications go through a single serialized path.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::time::Duration;

use crate::error::{AlertError, AlertResult};

/// Minimum-spacing gate for outbound notifications
pub struct AlertGate {
    limiter: DefaultDirectRateLimiter,
}

impl AlertGate {
    /// Gate allowing one pass per `interval`
    pub fn new(interval: Duration) -> AlertResult<Self> {
        let quota = Quota::with_period(interval)
            .ok_or_else(|| AlertError::ConfigError("alert interval must be positive".to_string()))?
            .allow_burst(nonzero!(1u32));

        Ok(Self {
            limiter: RateLimiter::direct(quota),
        })
    }

    /// Wait until the gate opens, then pass
    pub async fn until_ready(&self) {
        self.limiter.until_ready().await;
    }
}
