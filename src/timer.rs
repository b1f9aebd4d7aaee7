use std::ops::Mul;
use std::time::Duration;

use crate::SeededRng;

// In seconds.
const JITTER_RANGE: f32 = 0.5;

/// Retransmission timeout with exponential growth and per-attempt jitter.
///
/// The timeout doubles on every attempt until the retry budget is spent.
pub struct ExponentialBackoff {
    start_rto: Duration,
    retries: usize,
    rto: Duration,
    jitter: f32,
    left: usize,
}

impl ExponentialBackoff {
    pub fn new(start_rto: Duration, retries: usize, rng: &mut SeededRng) -> Self {
        Self {
            start_rto,
            retries,
            rto: start_rto,
            jitter: Self::jitter(rng),
            left: retries,
        }
    }

    pub fn reset(&mut self, rng: &mut SeededRng) {
        self.rto = self.start_rto;
        self.jitter = Self::jitter(rng);
        self.left = self.retries;
    }

    pub fn rto(&self) -> Duration {
        if self.jitter < 0.0 {
            let duration = Duration::from_secs_f32(self.jitter.abs());
            self.rto.saturating_sub(duration)
        } else {
            self.rto + Duration::from_secs_f32(self.jitter)
        }
        .max(Duration::from_millis(50))
    }

    // A value between -0.25s and 0.25s
    fn jitter(rng: &mut SeededRng) -> f32 {
        rng.random::<f32>() * JITTER_RANGE - (JITTER_RANGE / 2.0)
    }

    pub fn attempt(&mut self, rng: &mut SeededRng) {
        let (n, overflow) = self.left.overflowing_sub(1);

        if overflow {
            return;
        }

        self.left = n;
        self.jitter = Self::jitter(rng);
        self.rto = self.rto.mul(2);
    }

    pub fn can_retry(&self) -> bool {
        self.left > 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rto_doubles_per_attempt() {
        let mut rng = SeededRng::new(Some(42));
        let mut exp = ExponentialBackoff::new(Duration::from_secs(1), 3, &mut rng);

        let mut prev = exp.rto();
        for _ in 0..3 {
            assert!(exp.can_retry());
            exp.attempt(&mut rng);
            let next = exp.rto();
            assert!(next > prev);
            prev = next;
        }
        assert!(!exp.can_retry());

        // Further attempts are a no-op.
        exp.attempt(&mut rng);
        assert_eq!(exp.rto(), prev);
    }

    #[test]
    fn reset_restores_budget() {
        let mut rng = SeededRng::new(Some(7));
        let mut exp = ExponentialBackoff::new(Duration::from_secs(1), 1, &mut rng);

        exp.attempt(&mut rng);
        assert!(!exp.can_retry());

        exp.reset(&mut rng);
        assert!(exp.can_retry());
    }

    #[test]
    fn rto_has_floor() {
        let mut rng = SeededRng::new(Some(1));
        let exp = ExponentialBackoff::new(Duration::from_millis(1), 1, &mut rng);
        assert!(exp.rto() >= Duration::from_millis(50));
    }
}
