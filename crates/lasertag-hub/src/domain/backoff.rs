//! Reconnect delay schedule.
//!
//! After `n` failed reconnect attempts the next delay is
//! `min(base * factor^n, cap)` scaled by a uniform jitter of `±jitter`.
//! The attempt counter lives in the link and resets once it reaches
//! `connected`.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with a cap and symmetric jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    /// Fraction of the nominal delay, e.g. `0.2` for ±20 %.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// A policy without jitter, mostly useful for deterministic tests.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Delay before the next attempt, ignoring jitter.
    pub fn nominal_delay(&self, failed_attempts: u32) -> Duration {
        let exponent = i32::try_from(failed_attempts).unwrap_or(i32::MAX);
        let secs = self.base.as_secs_f64() * self.factor.max(1.0).powi(exponent);
        // powi overflows to +inf for large attempt counts; min() folds that into the cap.
        Duration::from_secs_f64(secs.min(self.cap.as_secs_f64()))
    }

    /// Delay for `failed_attempts` with an explicit jitter sample in `[-1, 1]`.
    pub fn delay_for_attempt(&self, failed_attempts: u32, sample: f64) -> Duration {
        let nominal = self.nominal_delay(failed_attempts).as_secs_f64();
        let jitter = self.jitter.clamp(0.0, 1.0) * sample.clamp(-1.0, 1.0);
        Duration::from_secs_f64((nominal * (1.0 + jitter)).max(0.0))
    }

    /// Delay for `failed_attempts` with a random jitter sample.
    pub fn delay(&self, failed_attempts: u32) -> Duration {
        if self.jitter <= 0.0 {
            return self.nominal_delay(failed_attempts);
        }
        let sample = rand::thread_rng().gen_range(-1.0..=1.0);
        self.delay_for_attempt(failed_attempts, sample)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
