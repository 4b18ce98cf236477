use std::time::Duration;

use rand::Rng;

/// Exponential backoff schedule used by [`super::RateLimitedClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Extra random delay, as a fraction of the computed delay (0.0 disables).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            multiplier: 2.0,
            max_delay: Duration::from_secs(8),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1 = first retry), without jitter.
    pub fn base_delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1) as i32;
        let ms = self.base_delay.as_millis() as f64 * self.multiplier.powi(exp);
        let capped = ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay_for(retry);
        if self.jitter <= 0.0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        base + base.mul_f64(extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(500),
            jitter: 0.0,
        }
    }

    #[test]
    fn delays_grow_exponentially_and_cap() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(400));
        assert_eq!(p.delay_for(4), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let p = RetryPolicy { jitter: 0.5, ..policy() };
        for _ in 0..50 {
            let d = p.delay_for(2);
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(300), "{d:?}");
        }
    }
}
