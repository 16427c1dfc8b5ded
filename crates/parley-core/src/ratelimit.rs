use std::num::NonZeroU32;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

/// Per-user budget for inbound gateway events, shared by every session of
/// the same user so extra tabs do not multiply it.
pub struct EventRateLimiter {
    limiter: Option<DefaultKeyedRateLimiter<i64>>,
}

impl EventRateLimiter {
    /// `per_minute == 0` disables limiting.
    pub fn per_minute(per_minute: u32) -> Self {
        Self {
            limiter: NonZeroU32::new(per_minute)
                .map(|quota| RateLimiter::keyed(Quota::per_minute(quota))),
        }
    }

    /// Consume one event from `user_id`'s budget.
    pub fn check(&self, user_id: i64) -> bool {
        match &self.limiter {
            Some(limiter) => limiter.check_key(&user_id).is_ok(),
            None => true,
        }
    }

    /// Drop state for users whose budget has fully refilled.
    pub fn prune(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }
}
