//! Per-connection inbound event rate limiting.
//!
//! Each WebSocket connection gets its own quota, keyed by contractor id.
//! Over-limit events are dropped silently: the connection stays open and the
//! client is not told, because a chatty client that gets an error for every
//! dropped ping just retries harder.

use std::num::NonZeroU32;

use governor::{DefaultKeyedRateLimiter, Quota};

use crew_core::ContractorId;

use crate::config::RateLimitConfig;

/// Keyed limiter over inbound WebSocket events.
pub struct EventLimiter {
    /// `None` when rate limiting is disabled.
    limiter: Option<DefaultKeyedRateLimiter<ContractorId>>,
}

impl std::fmt::Debug for EventLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLimiter")
            .field("enabled", &self.limiter.is_some())
            .finish()
    }
}

impl EventLimiter {
    /// Builds the limiter from configuration.
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        let limiter = config.enabled.then(|| {
            let rate =
                NonZeroU32::new(config.events_per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
            let burst = NonZeroU32::new(config.burst_size.max(1)).unwrap_or(NonZeroU32::MIN);
            DefaultKeyedRateLimiter::keyed(Quota::per_minute(rate).allow_burst(burst))
        });
        Self { limiter }
    }

    /// Checks whether an inbound event from this connection is within quota.
    ///
    /// Callers drop the event when this returns `false`.
    #[must_use]
    pub fn allow(&self, contractor: &ContractorId) -> bool {
        let Some(limiter) = self.limiter.as_ref() else {
            return true;
        };
        if limiter.check_key(contractor).is_ok() {
            true
        } else {
            tracing::warn!(contractor = %contractor, "inbound event rate limit hit; dropping");
            false
        }
    }

    /// Drops limiter state for connections that have gone quiet.
    ///
    /// Run periodically; without it the key map grows with every contractor
    /// that ever connected.
    pub fn purge_idle(&self) {
        if let Some(limiter) = self.limiter.as_ref() {
            limiter.retain_recent();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(events_per_minute: u32, burst_size: u32) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            events_per_minute,
            burst_size,
            purge_interval_secs: 300,
        }
    }

    #[test]
    fn burst_is_allowed_then_limited() {
        let limiter = EventLimiter::new(&config(60, 3));
        let contractor = ContractorId::generate();

        assert!(limiter.allow(&contractor));
        assert!(limiter.allow(&contractor));
        assert!(limiter.allow(&contractor));
        assert!(!limiter.allow(&contractor));
    }

    #[test]
    fn connections_are_limited_independently() {
        let limiter = EventLimiter::new(&config(60, 1));
        let first = ContractorId::generate();
        let second = ContractorId::generate();

        assert!(limiter.allow(&first));
        assert!(!limiter.allow(&first));
        assert!(limiter.allow(&second));
    }

    #[test]
    fn disabled_limiter_always_allows() {
        let limiter = EventLimiter::new(&RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        });
        let contractor = ContractorId::generate();
        for _ in 0..500 {
            assert!(limiter.allow(&contractor));
        }
    }
}
