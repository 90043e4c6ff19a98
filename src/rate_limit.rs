//! Fixed-window rate limiter for the worker's self-logging (§4.4.2).
//!
//! The source pulls in the `limits` package for this; here a small fixed-window
//! counter keyed by string suffices, in the shape the spec's design notes call
//! for: `(key) -> remaining_in_window, then hit(key)`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Window {
    count: u32,
    window_start: Instant,
}

/// Keys a diagnostic message by `(error_module, error_class[, errno])`, matching
/// the source's `_factor_rate_limit_key`.
pub fn rate_limit_key(module: &str, class: &str, errno: Option<i32>) -> String {
    match errno {
        Some(errno) => format!("{module}.{class}.{errno}"),
        None => format!("{module}.{class}"),
    }
}

/// A fixed-window rate limiter. `limit == 0` disables limiting entirely (every
/// call reports plenty of remaining budget), matching the source's
/// `ERROR_LOG_RATE_LIMIT = None` default-off behavior (§4.4.2).
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    state: HashMap<String, Window>,
}

impl RateLimiter {
    /// Build a limiter allowing `limit` hits per `window` for each distinct key.
    /// `limit == 0` disables rate limiting.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            state: HashMap::new(),
        }
    }

    /// A limiter that never suppresses anything.
    pub fn disabled() -> Self {
        Self::new(0, Duration::from_secs(1))
    }

    /// Return the number of further hits still allowed for `key` within the
    /// current window, then record this hit (0 means: suppress this and all
    /// further hits until the window rolls over). `remaining` always reflects
    /// the count *before* this call is counted, matching the read-then-hit
    /// split of a `get_window_stats`/`hit` pair.
    pub fn hit(&mut self, key: &str) -> u32 {
        if self.limit == 0 {
            return u32::MAX;
        }

        let now = Instant::now();
        let window = self.window;
        let limit = self.limit;
        let entry = self
            .state
            .entry(key.to_string())
            .or_insert_with(|| Window {
                count: 0,
                window_start: now,
            });

        if now.duration_since(entry.window_start) >= window {
            entry.count = 0;
            entry.window_start = now;
        }

        let remaining = limit.saturating_sub(entry.count);
        entry.count += 1;
        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_limiter_never_suppresses() {
        let mut limiter = RateLimiter::disabled();
        for _ in 0..1000 {
            assert!(limiter.hit("io.TimeoutError") > 1);
        }
    }

    #[test]
    fn enabled_limiter_counts_down_within_window() {
        let mut limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert_eq!(limiter.hit("k"), 3);
        assert_eq!(limiter.hit("k"), 2);
        assert_eq!(limiter.hit("k"), 1);
        assert_eq!(limiter.hit("k"), 0);
        assert_eq!(limiter.hit("k"), 0);
    }

    #[test]
    fn distinct_keys_have_independent_windows() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert_eq!(limiter.hit("a"), 1);
        assert_eq!(limiter.hit("b"), 1);
    }

    #[test]
    fn rate_limit_key_includes_errno_only_when_present() {
        assert_eq!(rate_limit_key("io", "TimeoutError", None), "io.TimeoutError");
        assert_eq!(
            rate_limit_key("io", "ConnectionError", Some(111)),
            "io.ConnectionError.111"
        );
    }
}
