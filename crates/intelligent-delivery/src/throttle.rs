//! Run throttling: pauses a campaign run after every `limit` dispatches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

pub struct RunThrottle {
    limit: u64,
    cooldown: Duration,
    dispatched: AtomicU64,
}

impl RunThrottle {
    /// A zero `limit` is treated as 1.
    pub fn new(limit: u32, cooldown: Duration) -> Self {
        Self {
            limit: u64::from(limit.max(1)),
            cooldown,
            dispatched: AtomicU64::new(0),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Count one dispatched recipient. Returns true when the new count is a
    /// multiple of the limit and the caller should cool down.
    pub fn record_dispatch(&self) -> bool {
        let count = self.dispatched.fetch_add(1, Ordering::Relaxed) + 1;
        count % self.limit == 0
    }

    pub async fn cooldown(&self) {
        info!(
            dispatched = self.dispatched(),
            limit = self.limit,
            cooldown_ms = self.cooldown.as_millis() as u64,
            "Rate limit reached, cooling down"
        );
        metrics::counter!("throttle.cooldowns").increment(1);
        tokio::time::sleep(self.cooldown).await;
    }

    /// Record a dispatch and sleep if the limit was hit.
    pub async fn after_dispatch(&self) -> bool {
        let hit = self.record_dispatch();
        if hit {
            self.cooldown().await;
        }
        hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_on_every_multiple() {
        let throttle = RunThrottle::new(2, Duration::ZERO);
        let hits: Vec<bool> = (0..6).map(|_| throttle.record_dispatch()).collect();
        assert_eq!(hits, vec![false, true, false, true, false, true]);
        assert_eq!(throttle.dispatched(), 6);
    }

    #[test]
    fn test_limit_one_cools_down_every_time() {
        let throttle = RunThrottle::new(1, Duration::ZERO);
        assert!(throttle.record_dispatch());
        assert!(throttle.record_dispatch());
    }

    #[test]
    fn test_zero_limit_clamped() {
        assert_eq!(RunThrottle::new(0, Duration::ZERO).limit(), 1);
    }

    #[tokio::test]
    async fn test_after_dispatch_reports_cooldown() {
        let throttle = RunThrottle::new(3, Duration::ZERO);
        assert!(!throttle.after_dispatch().await);
        assert!(!throttle.after_dispatch().await);
        assert!(throttle.after_dispatch().await);
    }
}
