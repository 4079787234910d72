use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// In-memory sliding-window rate limiter keyed by e.g. `login:<ip>`.
pub struct RateLimiter {
    entries: Mutex<HashMap<String, Vec<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Instant>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record an attempt and return true if it is allowed (under the limit).
    pub fn check_and_record(&self, key: &str, max_attempts: u64, window: Duration) -> bool {
        let mut map = self.lock();
        let now = Instant::now();
        let attempts = map.entry(key.to_string()).or_default();
        attempts.retain(|t| now.duration_since(*t) < window);

        if (attempts.len() as u64) < max_attempts {
            attempts.push(now);
            true
        } else {
            false
        }
    }

    /// Check remaining attempts without recording a new one.
    pub fn remaining(&self, key: &str, max_attempts: u64, window: Duration) -> u64 {
        let map = self.lock();
        let now = Instant::now();
        let used = map
            .get(key)
            .map(|a| a.iter().filter(|t| now.duration_since(**t) < window).count())
            .unwrap_or(0);
        max_attempts.saturating_sub(used as u64)
    }

    /// Forget a key, e.g. after a successful login.
    pub fn reset(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Drop entries older than `max_age`. Called from the session cleanup task.
    pub fn cleanup(&self, max_age: Duration) {
        let mut map = self.lock();
        let now = Instant::now();
        map.retain(|_, attempts| {
            attempts.retain(|t| now.duration_since(*t) < max_age);
            !attempts.is_empty()
        });
    }
}
