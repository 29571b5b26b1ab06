use std::time::Duration;

use crate::error::TrackerError;

/// Timing parameters for tracking sessions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackerConfig {
    /// How long to collect updates before deciding.
    pub primary_window: Duration,
    /// Second window, entered only when the primary window saw nothing.
    pub grace_window: Duration,
    /// Delay before the first resubscribe after the stream drops.
    pub reconnect_backoff: Duration,
    /// Cap for the doubling resubscribe delay.
    pub max_reconnect_backoff: Duration,
    /// Request timeout for the continuation call.
    pub continuation_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            primary_window: Duration::from_secs(120),
            grace_window: Duration::from_secs(60),
            reconnect_backoff: Duration::from_secs(3),
            max_reconnect_backoff: Duration::from_secs(30),
            continuation_timeout: Duration::from_secs(10),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), TrackerError> {
        let windows = [
            ("primary_window", self.primary_window),
            ("grace_window", self.grace_window),
            ("reconnect_backoff", self.reconnect_backoff),
            ("continuation_timeout", self.continuation_timeout),
        ];
        if let Some((name, _)) = windows.iter().find(|(_, d)| d.is_zero()) {
            return Err(TrackerError::InvalidConfig(format!("{name} must be non-zero")));
        }
        if self.max_reconnect_backoff < self.reconnect_backoff {
            return Err(TrackerError::InvalidConfig(
                "max_reconnect_backoff must be >= reconnect_backoff".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_two_minute_one_minute_cycle() {
        let config = TrackerConfig::default();
        assert_eq!(config.primary_window, Duration::from_secs(120));
        assert_eq!(config.grace_window, Duration::from_secs(60));
        assert_eq!(config.reconnect_backoff, Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_windows_are_rejected() {
        let config = TrackerConfig {
            grace_window: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("grace_window"), "got: {err}");
    }

    #[test]
    fn backoff_cap_below_base_is_rejected() {
        let config = TrackerConfig {
            reconnect_backoff: Duration::from_secs(10),
            max_reconnect_backoff: Duration::from_secs(5),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
