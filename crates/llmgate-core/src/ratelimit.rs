//! Per-user sliding-window rate limiting. Request and token counters are
//! tracked in four fixed windows keyed `(user, key, model, window)`;
//! check and record are separate calls, so a small burst-bounded
//! over-spend is accepted.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use llmgate_common::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Window {
    Second,
    Minute,
    Hour,
    Day,
}

pub const WINDOWS: [Window; 4] = [Window::Second, Window::Minute, Window::Hour, Window::Day];

impl Window {
    pub fn secs(&self) -> u64 {
        match self {
            Window::Second => 1,
            Window::Minute => 60,
            Window::Hour => 3600,
            Window::Day => 86400,
        }
    }

    fn index(&self) -> usize {
        match self {
            Window::Second => 0,
            Window::Minute => 1,
            Window::Hour => 2,
            Window::Day => 3,
        }
    }
}

/// Per-window request and token ceilings, indexed by [`Window::index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitSet {
    pub requests: [u64; 4],
    pub tokens: [u64; 4],
}

impl LimitSet {
    /// Tier fallbacks, applied when no per-user override exists.
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Basic => Self {
                requests: [2, 30, 500, 2_000],
                tokens: [20_000, 100_000, 1_000_000, 5_000_000],
            },
            Tier::Pro => Self {
                requests: [10, 120, 3_000, 20_000],
                tokens: [100_000, 500_000, 8_000_000, 50_000_000],
            },
            Tier::Max => Self {
                requests: [30, 600, 15_000, 100_000],
                tokens: [400_000, 2_000_000, 40_000_000, 200_000_000],
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    pub retry_after: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CounterKey {
    user_id: i64,
    key_id: i64,
    window: Window,
    window_id: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counter {
    requests: u64,
    tokens: u64,
}

/// In-memory window store. Counters expire with their window; stale keys
/// are pruned opportunistically on record.
#[derive(Default)]
pub struct RateLimiter {
    // Model participates in the scope as part of the per-model counters.
    counters: Mutex<HashMap<(CounterKey, String), Counter>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(
        &self,
        user_id: i64,
        key_id: i64,
        model: &str,
        limits: &LimitSet,
        estimated_tokens: u64,
    ) -> RateDecision {
        self.check_at(user_id, key_id, model, limits, estimated_tokens, now_unix())
    }

    pub fn record(&self, user_id: i64, key_id: i64, model: &str, tokens: u64) {
        self.record_at(user_id, key_id, model, tokens, now_unix());
    }

    fn check_at(
        &self,
        user_id: i64,
        key_id: i64,
        model: &str,
        limits: &LimitSet,
        estimated_tokens: u64,
        now: u64,
    ) -> RateDecision {
        let counters = self.counters.lock().expect("rate limiter poisoned");
        for window in WINDOWS {
            let key = CounterKey {
                user_id,
                key_id,
                window,
                window_id: now / window.secs(),
            };
            let counter = counters
                .get(&(key, model.to_string()))
                .copied()
                .unwrap_or_default();
            let idx = window.index();
            let over_requests = counter.requests + 1 > limits.requests[idx];
            let over_tokens = counter.tokens + estimated_tokens > limits.tokens[idx];
            if over_requests || over_tokens {
                let window_end = (key.window_id + 1) * window.secs();
                return RateDecision {
                    allowed: false,
                    retry_after: Some(Duration::from_secs(window_end.saturating_sub(now).max(1))),
                };
            }
        }
        RateDecision { allowed: true, retry_after: None }
    }

    fn record_at(&self, user_id: i64, key_id: i64, model: &str, tokens: u64, now: u64) {
        let mut counters = self.counters.lock().expect("rate limiter poisoned");
        for window in WINDOWS {
            let key = CounterKey {
                user_id,
                key_id,
                window,
                window_id: now / window.secs(),
            };
            let counter = counters.entry((key, model.to_string())).or_default();
            counter.requests += 1;
            counter.tokens += tokens;
        }
        // Expired windows are dead weight; sweep them while we hold the lock.
        counters.retain(|(key, _), _| key.window_id >= now / key.window.secs());
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tight() -> LimitSet {
        LimitSet {
            requests: [2, 10, 100, 1000],
            tokens: [100, 1000, 10_000, 100_000],
        }
    }

    #[test]
    fn allows_until_request_ceiling() {
        let limiter = RateLimiter::new();
        let limits = tight();
        let now = 1_000_000;

        assert!(limiter.check_at(1, 1, "m", &limits, 10, now).allowed);
        limiter.record_at(1, 1, "m", 10, now);
        assert!(limiter.check_at(1, 1, "m", &limits, 10, now).allowed);
        limiter.record_at(1, 1, "m", 10, now);

        let decision = limiter.check_at(1, 1, "m", &limits, 10, now);
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, Some(Duration::from_secs(1)));
    }

    #[test]
    fn token_ceiling_applies() {
        let limiter = RateLimiter::new();
        let limits = tight();
        let now = 1_000_000;
        limiter.record_at(1, 1, "m", 95, now);
        assert!(!limiter.check_at(1, 1, "m", &limits, 10, now).allowed);
        assert!(limiter.check_at(1, 1, "m", &limits, 5, now).allowed);
    }

    #[test]
    fn windows_reset() {
        let limiter = RateLimiter::new();
        let limits = tight();
        let now = 1_000_000;
        limiter.record_at(1, 1, "m", 10, now);
        limiter.record_at(1, 1, "m", 10, now);
        assert!(!limiter.check_at(1, 1, "m", &limits, 1, now).allowed);
        // Next second: the per-second window rolls over.
        assert!(limiter.check_at(1, 1, "m", &limits, 1, now + 1).allowed);
    }

    #[test]
    fn scopes_are_independent() {
        let limiter = RateLimiter::new();
        let limits = tight();
        let now = 1_000_000;
        limiter.record_at(1, 1, "m", 10, now);
        limiter.record_at(1, 1, "m", 10, now);
        assert!(!limiter.check_at(1, 1, "m", &limits, 1, now).allowed);
        // Different model and different user both have fresh counters.
        assert!(limiter.check_at(1, 1, "other", &limits, 1, now).allowed);
        assert!(limiter.check_at(2, 2, "m", &limits, 1, now).allowed);
    }

    #[test]
    fn tier_limits_ordered() {
        let basic = LimitSet::for_tier(Tier::Basic);
        let pro = LimitSet::for_tier(Tier::Pro);
        let max = LimitSet::for_tier(Tier::Max);
        for i in 0..4 {
            assert!(basic.requests[i] < pro.requests[i]);
            assert!(pro.requests[i] < max.requests[i]);
        }
    }
}
