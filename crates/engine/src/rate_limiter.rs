//! Token-bucket pacing for calls to one external provider
//!
//! Refilled continuously at `C` tokens per period, banking at most
//! `max(C, 1)` so a fractional budget still admits one call. A caller that
//! finds less than one token reserves the next one (the balance goes negative)
//! and sleeps until it has been paid back, so the lock is never held across a
//! sleep and concurrent waiters queue up behind each other's debt.
//!
//! The async and blocking forms share the same bucket.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    name: &'static str,
    capacity: f64,
    /// Tokens per second
    rate: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// `requests` per `period`. Starts full.
    ///
    /// Non-finite or non-positive budgets fall back to one request per period;
    /// config loading rejects them before they get here.
    pub fn new(name: &'static str, requests: f64, period: Duration) -> Self {
        let requests = if requests.is_finite() && requests > 0.0 {
            requests
        } else {
            1.0
        };
        let capacity = requests.max(1.0);
        let period = period.as_secs_f64().max(0.001);
        Self {
            name,
            capacity,
            rate: requests / period,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn per_period_secs(name: &'static str, requests: f64, period_secs: f64) -> Self {
        let period = Duration::try_from_secs_f64(period_secs).unwrap_or(Duration::from_secs(1));
        Self::new(name, requests, period)
    }

    /// Take one token, returning how long the caller must wait before using it
    fn reserve(&self) -> Duration {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Duration::ZERO;
        }

        let wait = (1.0 - bucket.tokens) / self.rate;
        bucket.tokens -= 1.0;
        Duration::from_secs_f64(wait)
    }

    /// Wait for a token without blocking the runtime thread
    pub async fn acquire(&self) {
        let wait = self.reserve();
        if !wait.is_zero() {
            debug!(limiter = self.name, wait_ms = wait.as_millis() as u64, "Rate limited");
            tokio::time::sleep(wait).await;
        }
    }

    /// Wait for a token by parking the current thread (for synchronous batch code)
    pub fn acquire_blocking(&self) {
        let wait = self.reserve();
        if !wait.is_zero() {
            debug!(limiter = self.name, wait_ms = wait.as_millis() as u64, "Rate limited");
            std::thread::sleep(wait);
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("rate", &self.rate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_paced() {
        let limiter = RateLimiter::new("test", 3.0, Duration::from_secs(1));
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(1));

        limiter.acquire().await;
        let fourth = start.elapsed();
        assert!(fourth >= Duration::from_millis(333), "{fourth:?}");
        assert!(fourth < Duration::from_millis(340), "{fourth:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_budget() {
        let limiter = RateLimiter::new("test", 2.0, Duration::from_secs(1));
        let start = Instant::now();
        let mut stamps = Vec::new();

        for _ in 0..10 {
            limiter.acquire().await;
            stamps.push(start.elapsed().as_secs_f64());
        }

        // Acquisitions up to time t never exceed capacity + t * rate
        for (i, t) in stamps.iter().enumerate() {
            let allowed = 2.0 + t * 2.0;
            assert!((i + 1) as f64 <= allowed + 1e-6, "acquisition {i} at {t}s");
        }
        // 10 tokens, 2 up front, 8 more at 2/s
        assert!(stamps[9] >= 4.0 - 1e-3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_refill_is_capped() {
        let limiter = RateLimiter::new("test", 2.0, Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(30)).await;

        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        // Only two tokens banked despite the long idle
        assert!(start.elapsed() >= Duration::from_millis(499));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_share_bucket() {
        let limiter = Arc::new(RateLimiter::new("test", 2.0, Duration::from_secs(1)));
        let start = Instant::now();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..6 {
            let limiter = limiter.clone();
            tasks.spawn(async move {
                limiter.acquire().await;
                start.elapsed()
            });
        }

        let mut latest = Duration::ZERO;
        while let Some(done) = tasks.join_next().await {
            latest = latest.max(done.unwrap());
        }
        assert!(latest >= Duration::from_millis(1999), "{latest:?}");
        assert!(latest < Duration::from_millis(2100), "{latest:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fractional_budget_paces_at_configured_rate() {
        let limiter = RateLimiter::new("test", 0.5, Duration::from_secs(1));
        let start = Instant::now();

        // One banked token, then one every two seconds
        for _ in 0..3 {
            limiter.acquire().await;
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3999), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(4100), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unusable_period_falls_back_to_one_second() {
        let limiter = RateLimiter::per_period_secs("test", 1.0, f64::INFINITY);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(999), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1100), "{elapsed:?}");
    }

    #[test]
    fn test_blocking_form_paces() {
        let limiter = RateLimiter::new("test", 2.0, Duration::from_millis(100));
        let start = std::time::Instant::now();
        for _ in 0..4 {
            limiter.acquire_blocking();
        }
        assert!(start.elapsed() >= Duration::from_millis(90));
    }
}
