//! Per-origin fixed window rate limiter for authorization attempts.

use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    attempts: u32,
}

/// Fixed window limiter keyed by origin (client address or forwarded identity).
///
/// Every attempt counts, successful or not, so a valid credential does not
/// reopen a window that guessing has exhausted.
pub struct RateLimiter {
    windows: DashMap<String, Window>,
    window: Duration,
    max_attempts: u32,
}

impl RateLimiter {
    pub fn new(window: Duration, max_attempts: u32) -> Self {
        Self {
            windows: DashMap::new(),
            window,
            max_attempts,
        }
    }

    /// Record an attempt from `origin`.
    ///
    /// Returns `Ok(())` if allowed, or `Err(retry_after_secs)` once the
    /// threshold for the current window has been reached.
    pub fn check(&self, origin: &str) -> Result<(), u64> {
        self.check_at(origin, Instant::now())
    }

    fn check_at(&self, origin: &str, now: Instant) -> Result<(), u64> {
        let mut entry = self.windows.entry(origin.to_string()).or_insert(Window {
            started: now,
            attempts: 0,
        });
        let window = entry.value_mut();

        if now.saturating_duration_since(window.started) >= self.window {
            window.started = now;
            window.attempts = 0;
        }

        if window.attempts >= self.max_attempts {
            let retry_after = (window.started + self.window).saturating_duration_since(now);
            return Err(retry_after.as_secs().max(1));
        }

        window.attempts += 1;
        Ok(())
    }

    /// Drop windows that have already ended to prevent unbounded growth.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < self.window);
    }

    /// Number of origins currently tracked.
    pub fn tracked_origins(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_threshold_within_window() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        let t0 = Instant::now();
        for _ in 0..3 {
            assert!(limiter.check_at("10.0.0.1", t0).is_ok());
        }
        let retry = limiter.check_at("10.0.0.1", t0).unwrap_err();
        assert_eq!(retry, 60);
        // Other origins are unaffected.
        assert!(limiter.check_at("10.0.0.2", t0).is_ok());
    }

    #[test]
    fn new_window_resets_count() {
        let limiter = RateLimiter::new(Duration::from_secs(10), 1);
        let t0 = Instant::now();
        assert!(limiter.check_at("a", t0).is_ok());
        assert!(limiter.check_at("a", t0 + Duration::from_secs(9)).is_err());
        assert!(limiter.check_at("a", t0 + Duration::from_secs(10)).is_ok());
    }

    #[test]
    fn cleanup_removes_finished_windows() {
        let limiter = RateLimiter::new(Duration::from_millis(0), 5);
        limiter.check("a").unwrap();
        limiter.cleanup();
        assert_eq!(limiter.tracked_origins(), 0);
    }
}
