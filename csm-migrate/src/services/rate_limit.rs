//! Per-service call spacing
//!
//! Each store client owns one limiter; it guarantees a minimum interval
//! between consecutive calls to that service, whichever task makes them.

use governor::{Quota, RateLimiter};
use std::time::Duration;

type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Minimum spacing between calls to one service
pub struct CallSpacing {
    limiter: Option<DirectLimiter>,
    min_interval: Duration,
}

impl CallSpacing {
    /// A zero interval disables throttling
    pub fn new(min_interval: Duration) -> Self {
        let limiter = Quota::with_period(min_interval).map(RateLimiter::direct);
        Self {
            limiter,
            min_interval,
        }
    }

    pub fn from_millis(min_interval_ms: u64) -> Self {
        Self::new(Duration::from_millis(min_interval_ms))
    }

    /// Wait until the next call is allowed
    pub async fn wait(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}
