//! Configuration for the token authority and the connection registry.

use std::time::Duration;

/// Settings for [`TokenAuthority`](crate::TokenAuthority).
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// How long an unredeemed token stays valid. `update` re-stamps the
    /// issue time, so the TTL is sliding.
    pub ttl: Duration,

    /// How often the expiry sweep runs.
    pub sweep_interval: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// Settings for [`ConnectionRegistry`](crate::ConnectionRegistry).
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// A connection with no inbound activity for this long is considered
    /// stale and force-closed by the sweep.
    pub stale_after: Duration,

    /// How often the stale sweep runs.
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
        }
    }
}
