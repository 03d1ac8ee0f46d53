//! Reconnect/backoff state machine for a single multiplexed WebSocket
//! session, grounded on the teacher's `scrapers/binance_session.rs`
//! (`SessionState`, `BackoffCalculator`).

use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Connecting,
    Subscribing,
    Streaming,
    Reconnecting,
    Shutdown,
}

/// Exponential backoff with jitter, capped, seeded deterministically
/// per session so repeated runs behave predictably in tests.
pub struct BackoffCalculator {
    base: Duration,
    max: Duration,
    attempt: u32,
    rng: ChaCha8Rng,
}

impl BackoffCalculator {
    pub fn new(base: Duration, max: Duration, seed: u64) -> Self {
        BackoffCalculator {
            base,
            max,
            attempt: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Next delay, advancing the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = 2u32.saturating_pow(self.attempt.min(10));
        let raw = self.base.mul_f64(exp as f64);
        let capped = raw.min(self.max);
        let jitter = self.rng.gen_range(0.8..1.2);
        self.attempt = self.attempt.saturating_add(1);
        capped.mul_f64(jitter)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_caps() {
        let mut b = BackoffCalculator::new(Duration::from_millis(100), Duration::from_secs(5), 1);
        let first = b.next_delay();
        let later = {
            for _ in 0..20 {
                b.next_delay();
            }
            b.next_delay()
        };
        assert!(first <= Duration::from_millis(130));
        assert!(later <= Duration::from_secs(6));
    }

    #[test]
    fn reset_restarts_growth() {
        let mut b = BackoffCalculator::new(Duration::from_millis(100), Duration::from_secs(5), 2);
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.attempt, 0);
    }
}
