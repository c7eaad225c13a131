//! Per-address token-bucket rate limiter.
//!
//! Buckets are created on first sight and evicted inline once the map grows
//! past a sweep watermark; there is no background sweeper. The watermark
//! starts at `max_tracked_addresses` and doubles past whatever a sweep leaves
//! behind, so a map full of active buckets is not rescanned on every call.

use std::collections::HashMap;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use parking_lot::Mutex;
use tracing::debug;

use crate::config::RateLimitConfig;

struct Bucket {
    limiter: DefaultDirectRateLimiter,
    last_seen: Instant,
}

struct Buckets {
    by_addr: HashMap<IpAddr, Bucket>,
    /// Sweep once the map holds more entries than this.
    sweep_above: usize,
}

/// Token bucket per normalized client address.
pub struct IpRateLimiter {
    quota: Quota,
    max_tracked: usize,
    idle_timeout: Duration,
    buckets: Mutex<Buckets>,
}

impl IpRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let quota =
            Quota::per_second(NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN))
                .allow_burst(NonZeroU32::new(config.burst).unwrap_or(NonZeroU32::MIN));
        Self {
            quota,
            max_tracked: config.max_tracked_addresses,
            idle_timeout: config.idle_timeout,
            buckets: Mutex::new(Buckets {
                by_addr: HashMap::new(),
                sweep_above: config.max_tracked_addresses,
            }),
        }
    }

    /// Take one token from the address's bucket.
    pub fn allow(&self, addr: IpAddr) -> bool {
        let addr = normalize(addr);
        let now = Instant::now();
        let mut buckets = self.buckets.lock();

        if buckets.by_addr.len() > buckets.sweep_above {
            let before = buckets.by_addr.len();
            buckets
                .by_addr
                .retain(|_, b| now.duration_since(b.last_seen) < self.idle_timeout);
            let kept = buckets.by_addr.len();
            buckets.sweep_above = self.max_tracked.max(kept.saturating_mul(2));
            debug!(
                evicted = before - kept,
                next_sweep_above = buckets.sweep_above,
                "idle rate-limit buckets evicted"
            );
        }

        let bucket = buckets.by_addr.entry(addr).or_insert_with(|| Bucket {
            limiter: RateLimiter::direct(self.quota),
            last_seen: now,
        });
        bucket.last_seen = now;
        bucket.limiter.check().is_ok()
    }

    /// Number of addresses currently tracked.
    pub fn tracked(&self) -> usize {
        self.buckets.lock().by_addr.len()
    }
}

/// IPv4-mapped IPv6 addresses share a bucket with their IPv4 form.
fn normalize(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(addr),
        v4 => v4,
    }
}
