//! Token bucket rate limiter, one instance per upstream source.
//!
//! The catalog, holder and PNL sources are limited independently, so they
//! never share a bucket. Every attempt takes a token, including ones that end
//! in an error.

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::debug;

struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }

    fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            let deficit = 1.0 - self.tokens;
            Duration::from_secs_f64(deficit / self.refill_rate)
        }
    }
}

pub struct RateLimiter {
    source: String,
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    /// `rate_per_sec` sustained requests, bursting up to `burst` when idle.
    pub fn new(source: &str, rate_per_sec: f64, burst: u32) -> Self {
        let rate = if rate_per_sec > 0.0 { rate_per_sec } else { 1.0 };
        let max = f64::from(burst.max(1));
        Self {
            source: source.to_string(),
            bucket: Mutex::new(TokenBucket {
                tokens: max,
                max_tokens: max,
                refill_rate: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait for a token. Returns true if we had to wait.
    pub async fn acquire(&self) -> bool {
        let mut waited = false;
        loop {
            let wait_time = {
                let mut b = self.bucket.lock().await;
                if b.try_acquire() {
                    return waited;
                }
                b.time_until_available()
            };

            waited = true;
            debug!(source = %self.source, "Rate limiter: waiting {:?}", wait_time);
            tokio::time::sleep(wait_time).await;
        }
    }

    pub async fn try_acquire(&self) -> bool {
        self.bucket.lock().await.try_acquire()
    }
}
