use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff between attempts of a failing handler call.
///
/// Durations are in milliseconds so the strategy can be written directly in
/// TOML (`{ strategy = "exponential", base_ms = 200, ... }`). Every variant
/// clamps to its maximum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RetryStrategy {
    /// `base * multiplier^attempt`, optionally spread by a deterministic
    /// jitter of +0% to +40%.
    Exponential {
        base_ms: u64,
        max_ms: u64,
        multiplier: f64,
        #[serde(default)]
        jitter: bool,
    },
    /// `delay * (attempt + 1)`.
    Linear { delay_ms: u64, max_ms: u64 },
    Constant { delay_ms: u64 },
}

impl RetryStrategy {
    /// Delay to wait after the zero-based failed `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Self::Exponential {
                base_ms,
                max_ms,
                multiplier,
                jitter,
            } => {
                #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
                let raw = *base_ms as f64 * multiplier.powi(attempt as i32);
                let adjusted = if *jitter {
                    raw * (1.0 + 0.1 * f64::from(attempt % 5))
                } else {
                    raw
                };
                #[allow(
                    clippy::cast_precision_loss,
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss
                )]
                let clamped = adjusted.min(*max_ms as f64).max(0.0).round() as u64;
                Duration::from_millis(clamped)
            }
            Self::Linear { delay_ms, max_ms } => {
                let raw = delay_ms.saturating_mul(u64::from(attempt) + 1);
                Duration::from_millis(raw.min(*max_ms))
            }
            Self::Constant { delay_ms } => Duration::from_millis(*delay_ms),
        }
    }

    /// Total time spent backing off across `retries` retries.
    pub fn total_backoff(&self, retries: u32) -> Duration {
        (0..retries).map(|attempt| self.delay_for(attempt)).sum()
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Exponential {
            base_ms: 500,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}
