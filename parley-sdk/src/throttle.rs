//! Outbound line-rate limiting.
//!
//! `burst` lines may go out back to back, after which one more is allowed
//! every `interval`. Servers disconnect clients that flood, so every outbound
//! line passes through here. Only the writer task ever waits on the gate;
//! the read loop never does.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

/// Flood limiter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloodConfig {
    pub burst: u32,
    pub interval: Duration,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            burst: 4,
            interval: Duration::from_secs(2),
        }
    }
}

impl FloodConfig {
    /// No limiting at all; used by tests and trusted local servers.
    pub fn unlimited() -> Self {
        Self {
            burst: 0,
            interval: Duration::ZERO,
        }
    }

    /// The limiter quota, or `None` when the interval is zero.
    fn quota(&self) -> Option<Quota> {
        let burst = NonZeroU32::new(self.burst).unwrap_or(NonZeroU32::MIN);
        Quota::with_period(self.interval).map(|q| q.allow_burst(burst))
    }
}

/// Gate in front of the socket. Holds no limiter when unlimited.
#[derive(Debug)]
pub struct FloodGate {
    limiter: Option<DefaultDirectRateLimiter>,
}

impl FloodGate {
    pub fn new(config: FloodConfig) -> Self {
        Self {
            limiter: config.quota().map(RateLimiter::direct),
        }
    }

    /// Take a slot without waiting. `false` when the caller would have to wait.
    pub fn try_take(&self) -> bool {
        self.limiter.as_ref().is_none_or(|l| l.check().is_ok())
    }

    /// Wait until a line may be sent, then consume its slot.
    pub async fn ready(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}
