//! Exponential backoff with jitter.
//!
//! A delay is `floor + U(0, spread) + U(0, min(cap, base * factor^(n-1)))`:
//! a fixed floor, a uniform spread so concurrently retrying queries do not
//! wake together, and a full-jitter exponential term that grows with the
//! attempt number up to a cap.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Minimum wait before any retry.
    pub floor: Duration,
    /// Width of the uniform jitter added on top of the floor.
    pub spread: Duration,
    /// Exponential term for the first retry.
    pub base: Duration,
    /// Growth factor per attempt.
    pub factor: f64,
    /// Upper bound of the exponential term.
    pub cap: Duration,
}

impl Backoff {
    /// Waits used for rate-limiting responses: 20-40 s plus up to 10 min.
    pub fn rate_limited() -> Self {
        Self {
            floor: Duration::from_secs(20),
            spread: Duration::from_secs(20),
            base: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(600),
        }
    }

    /// Waits used for every other retryable failure: 3-7 s plus up to 55 s.
    pub fn errors() -> Self {
        Self {
            floor: Duration::from_secs(3),
            spread: Duration::from_secs(4),
            base: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(55),
        }
    }

    /// Fixed delay, no jitter. Mostly useful in tests.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            floor: delay,
            spread: Duration::ZERO,
            base: Duration::ZERO,
            factor: 1.0,
            cap: Duration::ZERO,
        }
    }

    /// Upper bound of the exponential term for `attempt` (1-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.base.as_secs_f64() * self.factor.powi(exp);
        let capped = secs.min(self.cap.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    /// Largest delay `delay(attempt)` can return.
    pub fn max_delay(&self, attempt: u32) -> Duration {
        self.floor + self.spread + self.ceiling(attempt)
    }

    /// Randomized delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::rng();
        let spread = uniform(&mut rng, self.spread);
        let exp = uniform(&mut rng, self.ceiling(attempt));
        self.floor + spread + exp
    }
}

fn uniform(rng: &mut impl Rng, upper: Duration) -> Duration {
    if upper.is_zero() {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(rng.random_range(0.0..=upper.as_secs_f64()))
}
