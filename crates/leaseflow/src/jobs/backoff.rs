use chrono::Duration;
use rand::Rng;

use crate::error::QueueError;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base_seconds: i64,
    pub max_seconds: i64,
    pub jitter_pct: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_seconds: 2,
            max_seconds: 15 * 60,
            jitter_pct: 0.20,
        }
    }
}

impl BackoffConfig {
    /// Bounds under which `next_delay` is strictly positive and non-decreasing.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.base_seconds < 1 {
            return Err(QueueError::InvalidArgument(
                "backoff base_seconds must be >= 1".into(),
            ));
        }
        if self.max_seconds < self.base_seconds {
            return Err(QueueError::InvalidArgument(
                "backoff max_seconds must be >= base_seconds".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_pct) {
            return Err(QueueError::InvalidArgument(
                "backoff jitter_pct must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// Delay before a job that has been claimed `attempt_count` times may run again.
///
/// `base * 2^(attempt_count-1)` capped at `max`, plus jitter drawn from
/// `[0, jitter_pct * delay]` and clamped back to `max`. Jitter only ever adds,
/// and with `jitter_pct <= 1` the jittered delay for attempt `n` never exceeds
/// the un-jittered delay for `n + 1`.
pub fn next_delay(attempt_count: i32, cfg: &BackoffConfig, rng: &mut impl Rng) -> Duration {
    let attempt_count = attempt_count.max(1) as u32;
    let exp = attempt_count.saturating_sub(1);

    // Too large a shift saturates; the cap handles it.
    let pow2 = 1_i64.checked_shl(exp).filter(|p| *p > 0).unwrap_or(i64::MAX);

    let max_ms = cfg.max_seconds.saturating_mul(1000);
    let delay_ms = cfg
        .base_seconds
        .saturating_mul(1000)
        .saturating_mul(pow2)
        .min(max_ms);

    let jitter_range = (delay_ms as f64) * cfg.jitter_pct.clamp(0.0, 1.0);
    let jitter = if jitter_range > 0.0 {
        rng.gen_range(0.0..=jitter_range)
    } else {
        0.0
    };

    let jittered = (delay_ms as f64 + jitter).round() as i64;
    Duration::milliseconds(jittered.clamp(delay_ms.max(1), max_ms.max(1)))
}
