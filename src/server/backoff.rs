use crate::config::BackoffConfig;
use std::time::Duration;

/// Extra delay inserted before respawning after the server failed to bind its port.
///
/// Grows linearly by a fixed step per reported failure, up to a cap, and
/// drops back to zero once a bind is confirmed.
#[derive(Debug, Clone)]
pub struct SpawnBackoff {
    step: Duration,
    cap: Duration,
    current: Duration,
}

impl SpawnBackoff {
    pub fn new(step: Duration, cap: Duration) -> Self {
        Self {
            step,
            cap: cap.max(step),
            current: Duration::ZERO,
        }
    }

    /// Record a bind failure (`true`) or a confirmed bind (`false`). Returns the new delay.
    pub fn signal(&mut self, required: bool) -> Duration {
        self.current = if required {
            self.current.saturating_add(self.step).min(self.cap)
        } else {
            Duration::ZERO
        };
        self.current
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn is_active(&self) -> bool {
        !self.current.is_zero()
    }
}

impl From<BackoffConfig> for SpawnBackoff {
    fn from(config: BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.step_ms),
            Duration::from_millis(config.cap_ms),
        )
    }
}

impl Default for SpawnBackoff {
    fn default() -> Self {
        BackoffConfig::default().into()
    }
}

/// Wait applied between kill and respawn during a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartSpawnDelay {
    pub delay: Duration,
    /// Whether the backoff, rather than the configured delay, won.
    pub is_backoff: bool,
}

impl RestartSpawnDelay {
    pub fn resolve(configured: Duration, backoff: Duration) -> Self {
        if backoff > configured {
            Self {
                delay: backoff,
                is_backoff: true,
            }
        } else {
            Self {
                delay: configured,
                is_backoff: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_steps_and_caps() {
        let mut backoff = SpawnBackoff::new(Duration::from_secs(5), Duration::from_secs(12));
        assert_eq!(backoff.signal(true), Duration::from_secs(5));
        assert_eq!(backoff.signal(true), Duration::from_secs(10));
        assert_eq!(backoff.signal(true), Duration::from_secs(12));
        assert_eq!(backoff.signal(true), Duration::from_secs(12));
        assert_eq!(backoff.signal(false), Duration::ZERO);
        assert!(!backoff.is_active());
    }

    #[test]
    fn test_restart_delay_prefers_longest() {
        let configured = Duration::from_millis(500);
        let plain = RestartSpawnDelay::resolve(configured, Duration::ZERO);
        assert_eq!(plain.delay, configured);
        assert!(!plain.is_backoff);

        let backed_off = RestartSpawnDelay::resolve(configured, Duration::from_secs(5));
        assert_eq!(backed_off.delay, Duration::from_secs(5));
        assert!(backed_off.is_backoff);
    }
}
