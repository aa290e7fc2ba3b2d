//! Pacing between upstream connect attempts.
//!
//! The step doubles from `base` per retry and stops growing at `cap`. Jitter
//! only shortens a step (by up to a fifth), so `cap` is a hard ceiling and
//! workers retrying the same dead origin spread out instead of reconnecting
//! in lockstep.

use std::time::Duration;

use rand::Rng;

/// Share of a step that jitter may remove, as 1/N.
const JITTER_DIVISOR: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Un-jittered wait before retry number `retry` (1-based); zero for 0.
    pub fn step(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    pub fn delay(&self, retry: u32) -> Duration {
        self.delay_with(retry, &mut rand::thread_rng())
    }

    pub fn delay_with<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let step = self.step(retry);
        let spread = step / JITTER_DIVISOR;
        if spread.is_zero() {
            return step;
        }
        step - spread.mul_f64(rng.gen::<f64>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_millis(100), Duration::from_millis(1000))
    }

    #[test]
    fn steps_double_up_to_the_cap() {
        let b = backoff();
        let steps: Vec<u128> = (0..=6).map(|n| b.step(n).as_millis()).collect();
        assert_eq!(steps, [0, 100, 200, 400, 800, 1000, 1000]);
        assert_eq!(b.step(200), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_only_shortens() {
        let b = backoff();
        let mut rng = StdRng::seed_from_u64(7);
        for retry in 1..=8 {
            let step = b.step(retry);
            for _ in 0..50 {
                let delay = b.delay_with(retry, &mut rng);
                assert!(delay <= step, "{delay:?} > {step:?}");
                assert!(delay >= step - step / JITTER_DIVISOR, "{delay:?} too short for {step:?}");
            }
        }
    }

    #[test]
    fn zero_base_never_waits() {
        let b = Backoff::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(b.delay(3), Duration::ZERO);
        assert_eq!(b.delay(0), Duration::ZERO);
    }
}
