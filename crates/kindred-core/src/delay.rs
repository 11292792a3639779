use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Simulated "someone is typing" delay.
///
/// `(base + jitter·u1 + length) · (0.75 + 0.5·u2)`, capped at `max_ms` (itself
/// never above [`MAX_TYPING_DELAY_MS`]), where
/// `length = min(chars · per_char_ms, length_cap_ms)` for a known message
/// length and `length_cap_ms · u3` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingDelayConfig {
    pub base_ms: u64,
    pub jitter_ms: u64,
    pub per_char_ms: u64,
    pub length_cap_ms: u64,
    pub max_ms: u64,
}

impl Default for TypingDelayConfig {
    fn default() -> Self {
        Self {
            base_ms: 2_000,
            jitter_ms: 3_000,
            per_char_ms: 20,
            length_cap_ms: 1_000,
            max_ms: 5_000,
        }
    }
}

/// Hard ceiling on any simulated typing delay.
pub const MAX_TYPING_DELAY_MS: u64 = 5_000;

const MIN_MULTIPLIER: f64 = 0.75;
const MULTIPLIER_SPAN: f64 = 0.5;

impl TypingDelayConfig {
    /// No delay at all; handy for demos and tests.
    pub fn instant() -> Self {
        Self {
            base_ms: 0,
            jitter_ms: 0,
            per_char_ms: 0,
            length_cap_ms: 0,
            max_ms: 0,
        }
    }

    /// `max_ms` clamped to [`MAX_TYPING_DELAY_MS`].
    pub fn ceiling_ms(&self) -> u64 {
        self.max_ms.min(MAX_TYPING_DELAY_MS)
    }

    /// Shortest delay the formula can produce.
    pub fn floor_ms(&self) -> u64 {
        ((self.base_ms as f64 * MIN_MULTIPLIER) as u64).min(self.ceiling_ms())
    }

    /// The formula itself; `u1..u3` are uniforms in `[0, 1)`.
    pub fn compute(&self, message_len: Option<usize>, u1: f64, u2: f64, u3: f64) -> Duration {
        let u1 = u1.clamp(0.0, 1.0);
        let u2 = u2.clamp(0.0, 1.0);
        let u3 = u3.clamp(0.0, 1.0);

        let ceiling = self.ceiling_ms() as f64;
        let base = (self.base_ms as f64).min(ceiling);
        let jitter = (self.jitter_ms as f64 * u1).min(ceiling);
        let length = match message_len {
            Some(chars) => (chars as u64)
                .saturating_mul(self.per_char_ms)
                .min(self.length_cap_ms) as f64,
            None => self.length_cap_ms as f64 * u3,
        }
        .min(ceiling);

        let multiplier = MIN_MULTIPLIER + MULTIPLIER_SPAN * u2;
        let total = ((base + jitter + length) * multiplier).min(ceiling);
        Duration::from_millis(total.max(0.0) as u64)
    }

    pub fn sample<R: Rng + ?Sized>(&self, message_len: Option<usize>, rng: &mut R) -> Duration {
        let u1: f64 = rng.gen();
        let u2: f64 = rng.gen();
        let u3: f64 = rng.gen();
        self.compute(message_len, u1, u2, u3)
    }
}
