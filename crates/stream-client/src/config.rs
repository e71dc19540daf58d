use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Reconnect tuning for a [`crate::StreamClient`].
///
/// Delay before reconnect attempt `n` (1-based) is `reconnect_base_delay * n`.
/// Growth is linear and uncapped unless `max_delay` is set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub reconnect_base_delay: Duration,
    pub max_attempts: u32,
    pub max_delay: Option<Duration>,
    pub tap_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay: Duration::from_millis(1_000),
            max_attempts: 5,
            max_delay: None,
            tap_capacity: 256,
        }
    }
}

impl StreamConfig {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.reconnect_base_delay.saturating_mul(attempt.max(1));
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_backoff_uncapped_by_default() {
        let cfg = StreamConfig::default();
        assert_eq!(cfg.delay_for(1), Duration::from_secs(1));
        assert_eq!(cfg.delay_for(3), Duration::from_secs(3));
        assert_eq!(cfg.delay_for(40), Duration::from_secs(40));
    }

    #[test]
    fn optional_cap_applies() {
        let cfg = StreamConfig {
            max_delay: Some(Duration::from_millis(2_500)),
            ..StreamConfig::default()
        };
        assert_eq!(cfg.delay_for(2), Duration::from_secs(2));
        assert_eq!(cfg.delay_for(5), Duration::from_millis(2_500));
    }
}
