use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::KvStore;

/// Refill window. Both configured actions refill their full capacity per
/// window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Per-(user, action) token bucket.
///
/// Bucket state lives in the cache store under `rate_limit:{user}:{action}`
/// and is mutated through the store's atomic `update`: load, refill,
/// consume, and persist happen in one round trip, so concurrent bursts
/// cannot overdraw the bucket. Idle buckets expire after two windows.
pub struct TokenBucket {
    kv: Arc<KvStore>,
    capacity: i64,
    refill: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct BucketState {
    tokens: i64,
    last_refill: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct Decision {
    pub allowed: bool,
    pub limit: i64,
    pub remaining: i64,
}

impl TokenBucket {
    pub fn new(kv: Arc<KvStore>, capacity: i64, refill: i64) -> Self {
        Self {
            kv,
            capacity,
            refill,
        }
    }

    /// Attempts to consume one token. `now` is unix seconds so behavior is
    /// deterministic under test.
    pub fn allow(&self, user_id: &str, action: &str, now: i64) -> Decision {
        let key = bucket_key(user_id, action);
        self.kv.update(&key, |raw| {
            let mut state = load_state(raw, self.capacity, now);

            let elapsed = (now - state.last_refill).max(0);
            let add = elapsed * self.refill / WINDOW.as_secs() as i64;
            if add > 0 {
                state.tokens = (state.tokens + add).min(self.capacity);
                state.last_refill = now;
            }

            let allowed = state.tokens >= 1;
            if allowed {
                state.tokens -= 1;
            }

            let decision = Decision {
                allowed,
                limit: self.capacity,
                remaining: state.tokens,
            };
            (persist(&key, &state), decision)
        })
    }
}

fn bucket_key(user_id: &str, action: &str) -> String {
    format!("rate_limit:{user_id}:{action}")
}

fn load_state(raw: Option<&str>, capacity: i64, now: i64) -> BucketState {
    raw.and_then(|r| serde_json::from_str(r).ok())
        .unwrap_or(BucketState {
            tokens: capacity,
            last_refill: now,
        })
}

fn persist(key: &str, state: &BucketState) -> Option<(String, Duration)> {
    match serde_json::to_string(state) {
        Ok(raw) => Some((raw, WINDOW * 2)),
        Err(e) => {
            warn!(key, "failed to encode bucket state: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(capacity: i64) -> TokenBucket {
        TokenBucket::new(Arc::new(KvStore::new()), capacity, capacity)
    }

    #[test]
    fn exactly_capacity_calls_are_allowed_within_one_second() {
        let tb = bucket(20);
        let now = 1_700_000_000;

        for i in 0..20 {
            let d = tb.allow("u1", "stories", now);
            assert!(d.allowed, "call {} should pass", i + 1);
            assert_eq!(d.remaining, 20 - 1 - i);
        }

        let d = tb.allow("u1", "stories", now + 1);
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
    }

    #[test]
    fn refill_is_floored_and_capped() {
        let tb = bucket(20);
        let now = 1_700_000_000;

        for _ in 0..20 {
            tb.allow("u1", "stories", now);
        }

        // 2 seconds → floor(2/60 × 20) = 0 tokens back.
        assert!(!tb.allow("u1", "stories", now + 2).allowed);

        // 3 seconds → floor(3/60 × 20) = 1 token.
        let d = tb.allow("u1", "stories", now + 3);
        assert!(d.allowed);
        assert_eq!(d.remaining, 0);

        // A full window later the bucket is back at capacity, not above it:
        // consuming one token leaves capacity - 1.
        let d = tb.allow("u1", "stories", now + 3 + 60);
        assert!(d.allowed);
        assert_eq!(d.remaining, 19);
    }

    #[test]
    fn buckets_are_isolated_per_user_and_action() {
        let tb = bucket(1);
        let now = 1_700_000_000;

        assert!(tb.allow("u1", "stories", now).allowed);
        assert!(!tb.allow("u1", "stories", now).allowed);
        assert!(tb.allow("u2", "stories", now).allowed);
        assert!(tb.allow("u1", "reactions", now).allowed);
    }
}
