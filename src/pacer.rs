use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::RateTier;

/// Spaces proxy requests at least `interval` apart.
///
/// Every request asks for a slot before it goes out. The first slot is
/// immediate; each later one is the previous slot plus `interval`, or now if
/// that moment has already passed.
pub struct Pacer {
    interval: Duration,
    tier: RateTier,
    next_slot: Mutex<Option<Instant>>,
    waits: AtomicU32,
}

impl Pacer {
    pub fn new(tier: RateTier) -> Self {
        Self::with_interval(tier, tier.interval())
    }

    pub fn with_interval(tier: RateTier, interval: Duration) -> Self {
        Self {
            interval,
            tier,
            next_slot: Mutex::new(None),
            waits: AtomicU32::new(0),
        }
    }

    pub async fn wait(&self) {
        let now = Instant::now();
        let slot = {
            let mut next = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = match *next {
                Some(t) if t > now => t,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };

        if slot <= now {
            return;
        }

        let n = self.waits.fetch_add(1, Ordering::Relaxed);
        let delay = slot - now;
        debug!("Pacing: waiting {:.1}s before next proxy request", delay.as_secs_f64());
        if self.tier == RateTier::Free && n % 5 == 0 {
            info!("Tip: set READER_API_KEY for ~10x faster scraping (200 req/min vs 20 req/min)");
        }
        tokio::time::sleep_until(slot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_call_is_immediate() {
        let pacer = Pacer::new(RateTier::Free);
        let t0 = Instant::now();
        pacer.wait().await;
        assert_eq!(t0.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_calls_are_spaced_by_tier() {
        let pacer = Pacer::new(RateTier::Free);
        let t0 = Instant::now();
        pacer.wait().await;
        pacer.wait().await;
        assert_eq!(t0.elapsed(), Duration::from_millis(3500));
        pacer.wait().await;
        assert_eq!(t0.elapsed(), Duration::from_millis(7000));

        let fast = Pacer::new(RateTier::Authenticated);
        let t1 = Instant::now();
        fast.wait().await;
        fast.wait().await;
        assert_eq!(t1.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn time_spent_elsewhere_counts_toward_the_interval() {
        let pacer = Pacer::new(RateTier::Free);
        let t0 = Instant::now();
        pacer.wait().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        pacer.wait().await;
        assert_eq!(t0.elapsed(), Duration::from_millis(3500));

        tokio::time::sleep(Duration::from_secs(10)).await;
        let before = Instant::now();
        pacer.wait().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }
}
