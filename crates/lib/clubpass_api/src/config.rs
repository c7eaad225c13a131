//! API server configuration.

use std::time::Duration;

/// Per-address token-bucket settings.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Sustained requests per second per address.
    pub requests_per_second: u32,
    /// Bucket size.
    pub burst: u32,
    /// Tracked addresses above which idle buckets are evicted.
    pub max_tracked_addresses: usize,
    /// How long a bucket may go unused before it is evictable.
    pub idle_timeout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5,
            burst: 10,
            max_tracked_addresses: 10_000,
            idle_timeout: Duration::from_secs(10 * 60),
        }
    }
}

/// Configuration for the HTTP surface.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3200").
    pub bind_addr: String,
    /// Set the `Secure` attribute on the refresh cookie.
    pub secure_cookies: bool,
    /// Take the client address from `X-Forwarded-For` when present.
    /// Only enable behind a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
    pub rate_limit: RateLimitConfig,
}

impl Default for ApiConfig {
    /// | Setting               | Default          |
    /// |-----------------------|------------------|
    /// | `bind_addr`           | `127.0.0.1:3200` |
    /// | `secure_cookies`      | `true`           |
    /// | `trust_forwarded_for` | `false`          |
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3200".into(),
            secure_cookies: true,
            trust_forwarded_for: false,
            rate_limit: RateLimitConfig::default(),
        }
    }
}
