/// Sliding-window send rate limiter, keyed by author
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

pub struct RateLimiter {
    max_per_window: usize,
    window: Duration,
    history: HashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_per_window: usize, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            history: HashMap::new(),
        }
    }

    pub fn per_minute(max: usize) -> Self {
        Self::new(max, Duration::from_secs(60))
    }

    /// Record an attempt at `now`; false when the author is over the limit.
    /// Rejected attempts are not recorded.
    pub fn check(&mut self, key: &str, now: Instant) -> bool {
        let window = self.window;
        // Authors with nothing left in the window are forgotten
        self.history.retain(|_, attempts| {
            while let Some(oldest) = attempts.front() {
                if now.duration_since(*oldest) >= window {
                    attempts.pop_front();
                } else {
                    break;
                }
            }
            !attempts.is_empty()
        });

        let recent = self.history.get(key).map_or(0, VecDeque::len);
        if recent >= self.max_per_window {
            return false;
        }
        self.history.entry(key.to_string()).or_default().push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_and_window_expiry() {
        let mut limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();

        assert!(limiter.check("u1", start));
        assert!(limiter.check("u1", start + Duration::from_secs(1)));
        assert!(!limiter.check("u1", start + Duration::from_secs(2)));

        // Other authors are tracked separately
        assert!(limiter.check("u2", start + Duration::from_secs(2)));

        // First attempt ages out of the window
        assert!(limiter.check("u1", start + Duration::from_secs(60)));
    }

    #[test]
    fn test_idle_authors_are_dropped() {
        let mut limiter = RateLimiter::per_minute(5);
        let start = Instant::now();

        for n in 0..50 {
            assert!(limiter.check(&format!("guest-{}", n), start));
        }
        assert_eq!(limiter.history.len(), 50);

        assert!(limiter.check("u1", start + Duration::from_secs(61)));
        assert_eq!(limiter.history.len(), 1);
        assert!(limiter.history.contains_key("u1"));
    }

    #[test]
    fn test_zero_limit_keeps_no_history() {
        let mut limiter = RateLimiter::per_minute(0);
        let start = Instant::now();
        assert!(!limiter.check("u1", start));
        assert!(!limiter.check("u1", start + Duration::from_secs(1)));
        assert!(limiter.history.is_empty());
    }
}
