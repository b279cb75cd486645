use std::time::Duration;

use rand::Rng;

/// Exponential backoff with symmetric jitter.
///
/// The delay after the `n`th failed attempt is `min(max, base * 2^(n-1))`
/// shifted by up to `jitter_fraction` of itself in either direction, then
/// clamped to `[0, max]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub jitter_fraction: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter_fraction: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the undithered exponential is jittered.
    pub fn nominal_delay(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    pub fn delay<R: Rng>(&self, failed_attempt: u32, rng: &mut R) -> Duration {
        let nominal = self.nominal_delay(failed_attempt);
        let fraction = self.jitter_fraction.clamp(0.0, 1.0);
        if fraction == 0.0 || nominal.is_zero() {
            return nominal;
        }
        let spread = nominal.as_secs_f64() * fraction;
        let jittered = nominal.as_secs_f64() + rng.gen_range(-spread..=spread);
        Duration::from_secs_f64(jittered.clamp(0.0, self.max.as_secs_f64()))
    }
}
