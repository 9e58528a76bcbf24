//! Bounded backoff for optimistic-concurrency retries.

use std::time::Duration;

use rand::Rng;

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one; at least 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self { max_attempts: max_attempts.max(1), initial_delay: Duration::ZERO, max_delay: Duration::ZERO, multiplier: 1.0 }
    }

    /// Defaults overridden by `PEERAGE_CONFLICT_RETRIES`.
    pub fn from_env() -> Self {
        let max_attempts = std::env::var("PEERAGE_CONFLICT_RETRIES")
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .map(|n| n.max(1))
            .unwrap_or(5);
        Self { max_attempts, ..Default::default() }
    }

    /// Un-jittered wait after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let secs = (self.initial_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Sleep before the next attempt, with 0.5x..1.5x jitter.
    pub async fn pause(&self, attempt: u32) {
        let base = self.delay_for(attempt);
        if base.is_zero() {
            return;
        }
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        tokio::time::sleep(Duration::from_secs_f64(base.as_secs_f64() * jitter)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(1), Duration::from_millis(50));
        assert_eq!(p.delay_for(2), Duration::from_millis(100));
        assert_eq!(p.delay_for(10), Duration::from_secs(1));
    }

    #[test]
    fn immediate_never_waits() {
        let p = RetryPolicy::immediate(0);
        assert_eq!(p.max_attempts, 1);
        assert!(p.delay_for(3).is_zero());
    }
}
