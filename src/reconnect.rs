//! Reconnection policy applied after abnormal closes.
//!
//! The default is capped exponential backoff with an attempt ceiling.
//! [`ReconnectPolicy::fixed`] keeps the older fixed-delay, never-give-up
//! behavior for deployments that want it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{MAX_RECONNECT_ATTEMPTS, MAX_RECONNECT_DELAY, RECONNECT_DELAY};

/// How long to wait before each reconnection attempt, and when to stop.
///
/// Attempts are counted per subject id and reset when a connection opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor between consecutive attempts (1 = fixed delay).
    pub multiplier: u32,
    /// Give up after this many consecutive attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::exponential(RECONNECT_DELAY, MAX_RECONNECT_DELAY, Some(MAX_RECONNECT_ATTEMPTS))
    }
}

impl ReconnectPolicy {
    /// Same delay every time, unbounded attempts.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        let ms = duration_ms(delay);
        Self {
            initial_delay_ms: ms,
            max_delay_ms: ms,
            multiplier: 1,
            max_attempts: None,
        }
    }

    /// Doubling delays from `initial`, capped at `max`.
    #[must_use]
    pub fn exponential(initial: Duration, max: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            initial_delay_ms: duration_ms(initial),
            max_delay_ms: duration_ms(max),
            multiplier: 2,
            max_attempts,
        }
    }

    /// Delay before the `attempt`-th consecutive reconnect (1-based).
    ///
    /// Returns `None` once the attempt budget is spent.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return Some(Duration::ZERO);
        }
        if self.max_attempts.is_some_and(|max| attempt > max) {
            return None;
        }

        let factor = u64::from(self.multiplier.max(1)).saturating_pow(attempt - 1);
        let cap = self.max_delay_ms.max(self.initial_delay_ms);
        let delay = self.initial_delay_ms.saturating_mul(factor).min(cap);
        Some(Duration::from_millis(delay))
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
