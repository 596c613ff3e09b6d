use governor::clock::DefaultClock;
use governor::state::{direct::NotKeyed, InMemoryState};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::time::Duration;

/// Token-bucket pacing between units of work (one query, one batch).
///
/// The first unit goes through immediately; after that one permit is issued
/// per interval, so bursts are never larger than a single unit.
pub struct Pacer {
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl Pacer {
    /// A zero interval disables pacing.
    pub fn every(interval: Duration) -> Self {
        match Quota::with_period(interval) {
            Some(quota) => Self { limiter: Some(RateLimiter::direct(quota)) },
            None => Self::unlimited(),
        }
    }

    pub fn per_minute(units: NonZeroU32) -> Self {
        Self {
            limiter: Some(RateLimiter::direct(Quota::per_minute(units).allow_burst(nonzero!(1u32)))),
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::every(Duration::from_millis(ms))
    }

    pub fn unlimited() -> Self {
        Self { limiter: None }
    }

    pub async fn ready(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

impl Default for Pacer {
    /// Twelve units a minute, the pace of the ADS search loop.
    fn default() -> Self {
        Self::per_minute(nonzero!(12u32))
    }
}
