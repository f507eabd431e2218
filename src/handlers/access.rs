use std::collections::HashMap;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::config::CONFIG;

const PRUNE_THRESHOLD: usize = 10_000;

static RATE_LIMITER: Lazy<RateLimiter> =
    Lazy::new(|| RateLimiter::new(Duration::from_secs(CONFIG.rate_limit_seconds)));

/// Allows one chat turn per user per window.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    last_seen: Mutex<HashMap<i64, Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` when the user must wait; otherwise records the turn.
    pub fn check(&self, user_id: i64, now: Instant) -> bool {
        if self.window.is_zero() {
            return false;
        }

        let mut last_seen = self.last_seen.lock();
        if let Some(last) = last_seen.get(&user_id) {
            if now.saturating_duration_since(*last) < self.window {
                return true;
            }
        }

        if last_seen.len() >= PRUNE_THRESHOLD {
            let window = self.window;
            last_seen.retain(|_, seen| now.saturating_duration_since(*seen) < window);
        }
        last_seen.insert(user_id, now);
        false
    }
}

pub fn is_rate_limited(user_id: i64) -> bool {
    RATE_LIMITER.check(user_id, Instant::now())
}
