//! Time helpers.
//!
//! IMPORTANT: these use `SystemTime::now()` and are NON-DETERMINISTIC.
//! Safe for logging, TTL bookkeeping and timeout deadlines. Never use them
//! to decide consensus-relevant facts: block timestamps come from the
//! `chain_oracle` crate, not from here.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub type TimestampSeconds = u64;
pub type TimestampMillis = u64;

#[inline]
pub fn get_current_time() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
}

#[inline]
pub fn get_current_time_in_seconds() -> TimestampSeconds {
    get_current_time().as_secs()
}

#[inline]
pub fn get_current_time_in_millis() -> TimestampMillis {
    get_current_time().as_millis() as TimestampMillis
}

/// `true` if `expires_at` (seconds since epoch) has already passed.
#[inline]
pub fn has_expired(expires_at: TimestampSeconds) -> bool {
    get_current_time_in_seconds() >= expires_at
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_time_is_monotonic_enough() {
        let a = get_current_time_in_millis();
        let b = get_current_time_in_millis();
        assert!(b >= a);
    }

    #[test]
    fn expiry_in_the_past_is_expired() {
        assert!(has_expired(1));
    }

    #[test]
    fn expiry_far_in_the_future_is_not_expired() {
        assert!(!has_expired(get_current_time_in_seconds() + 3600));
    }
}
