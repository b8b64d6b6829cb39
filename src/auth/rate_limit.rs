use moka::sync::Cache;
use std::time::{Duration, Instant};

const MAX_ATTEMPTS: u32 = 5;
const WINDOW: Duration = Duration::from_secs(900);

#[derive(Clone)]
struct AttemptWindow {
    count: u32,
    expires_at: Instant,
}

/// Failed-login counter per (client ip, lowercased username). The window is
/// fixed at the first failed attempt; later failures increment the count but
/// do not extend it. A successful login deletes the counter.
pub struct LoginRateLimiter {
    cache: Cache<String, AttemptWindow>,
}

impl LoginRateLimiter {
    pub fn new() -> Self {
        // The cache TTL is only an eviction backstop; expiry is enforced via
        // the per-entry deadline so increments cannot extend the window.
        let cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(WINDOW)
            .build();
        Self { cache }
    }

    fn key(ip: &str, username: &str) -> String {
        format!("web_login_attempts:{ip}:{username}")
    }

    /// True when the counter has already reached the limit. Checked before
    /// any password hashing happens.
    pub fn is_blocked(&self, ip: &str, username: &str) -> bool {
        match self.cache.get(&Self::key(ip, username)) {
            Some(w) => w.expires_at > Instant::now() && w.count >= MAX_ATTEMPTS,
            None => false,
        }
    }

    pub fn record_failure(&self, ip: &str, username: &str) {
        let key = Self::key(ip, username);
        let now = Instant::now();
        let next = match self.cache.get(&key) {
            Some(w) if w.expires_at > now => AttemptWindow {
                count: w.count.saturating_add(1),
                expires_at: w.expires_at,
            },
            _ => AttemptWindow {
                count: 1,
                expires_at: now + WINDOW,
            },
        };
        self.cache.insert(key, next);
    }

    pub fn reset(&self, ip: &str, username: &str) {
        self.cache.invalidate(&Self::key(ip, username));
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_five_failures() {
        let limiter = LoginRateLimiter::new();
        for _ in 0..4 {
            limiter.record_failure("198.51.100.10", "admin_root");
        }
        assert!(!limiter.is_blocked("198.51.100.10", "admin_root"));

        limiter.record_failure("198.51.100.10", "admin_root");
        assert!(limiter.is_blocked("198.51.100.10", "admin_root"));
    }

    #[test]
    fn counters_are_scoped_per_ip_and_user() {
        let limiter = LoginRateLimiter::new();
        for _ in 0..5 {
            limiter.record_failure("198.51.100.10", "admin_root");
        }
        assert!(limiter.is_blocked("198.51.100.10", "admin_root"));
        assert!(!limiter.is_blocked("198.51.100.11", "admin_root"));
        assert!(!limiter.is_blocked("198.51.100.10", "other_user"));
    }

    #[test]
    fn successful_login_clears_the_counter() {
        let limiter = LoginRateLimiter::new();
        for _ in 0..5 {
            limiter.record_failure("198.51.100.10", "admin_root");
        }
        limiter.reset("198.51.100.10", "admin_root");
        assert!(!limiter.is_blocked("198.51.100.10", "admin_root"));
    }
}
