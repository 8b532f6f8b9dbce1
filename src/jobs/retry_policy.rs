use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// How long a record waits in `New` after a retryable failure before it can
/// be claimed again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Eligible again right away
    #[default]
    Immediate,
    /// Same delay after every failure
    Fixed { delay_seconds: u64 },
    /// `base_delay_seconds * multiplier^(tries - 1)`, optionally capped
    Exponential {
        base_delay_seconds: u64,
        #[serde(default = "default_multiplier")]
        multiplier: u64,
        #[serde(default)]
        max_delay_seconds: Option<u64>,
    },
}

const fn default_multiplier() -> u64 {
    2
}

impl RetryPolicy {
    /// Delay after the failure that brought the record to `tries` attempts.
    #[must_use]
    pub fn delay(&self, tries: u32) -> Duration {
        match self {
            Self::Immediate => Duration::ZERO,
            Self::Fixed { delay_seconds } => Duration::from_secs(*delay_seconds),
            Self::Exponential {
                base_delay_seconds,
                multiplier,
                max_delay_seconds,
            } => {
                let exponent = tries.saturating_sub(1);
                let delay_seconds = multiplier
                    .checked_pow(exponent)
                    .and_then(|factor| base_delay_seconds.checked_mul(factor))
                    .unwrap_or(u64::MAX);
                let capped = max_delay_seconds.map_or(delay_seconds, |max| delay_seconds.min(max));
                Duration::from_secs(capped)
            }
        }
    }

    /// `None` when the record may be claimed immediately.
    #[must_use]
    pub fn next_attempt_at(&self, tries: u32, now: NaiveDateTime) -> Option<NaiveDateTime> {
        let delay = self.delay(tries);
        if delay.is_zero() {
            return None;
        }

        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        Some(now.checked_add_signed(delay).unwrap_or(NaiveDateTime::MAX))
    }
}
