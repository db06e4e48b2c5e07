//! Per-phone rate limiting for OTP delivery.
//!
//! Bounds how many codes a single phone number can be sent, so a client
//! cannot flood one recipient through the generate sub-protocol.

use governor::{
    clock::DefaultClock,
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Default sustained rate: codes per minute per phone.
pub const DEFAULT_PER_MINUTE: u32 = 2;
/// Default burst: codes sent back to back before throttling.
pub const DEFAULT_BURST: u32 = 5;

/// Keyed rate limiter, one bucket per phone number.
#[derive(Clone)]
pub struct OtpRateLimiter {
    limiter: Arc<KeyedLimiter>,
}

impl OtpRateLimiter {
    /// Create a limiter allowing `per_minute` sustained and `burst` immediate
    /// deliveries per phone. Zero values fall back to the defaults.
    pub fn new(per_minute: u32, burst: u32) -> Self {
        let per_minute = NonZeroU32::new(per_minute).unwrap_or(nonzero(DEFAULT_PER_MINUTE));
        let burst = NonZeroU32::new(burst).unwrap_or(nonzero(DEFAULT_BURST));

        let quota = Quota::per_minute(per_minute).allow_burst(burst);

        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }

    /// Returns `true` if a code may be sent to `phone` now.
    pub fn check(&self, phone: &str) -> bool {
        self.limiter.check_key(&phone.to_string()).is_ok()
    }

    /// Drop buckets that have fully refilled.
    pub fn prune(&self) {
        self.limiter.retain_recent();
    }

    pub fn tracked(&self) -> usize {
        self.limiter.len()
    }
}

impl Default for OtpRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_PER_MINUTE, DEFAULT_BURST)
    }
}

fn nonzero(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN)
}
