use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ratelimit::RATELIMIT_DROP_ROUND;

/// Rate limiting configuration shared by every handler of a [`RateLimiter`](crate::RateLimiter)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Grace period added to "now" when expired cooldowns are collected.
    ///
    /// Cooldowns ending within this window of each other are released by the
    /// same wakeup.
    #[serde(default = "default_drop_round", with = "humantime_serde")]
    pub drop_round: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            drop_round: default_drop_round(),
        }
    }
}

/// Default grace period when collecting expired cooldowns
const fn default_drop_round() -> Duration {
    RATELIMIT_DROP_ROUND
}

impl RateLimitConfig {
    /// Create a `RateLimitConfig` from CLI options, using defaults for missing values
    #[must_use]
    pub fn from_options(drop_round: Option<Duration>) -> Self {
        Self {
            drop_round: drop_round.unwrap_or(RATELIMIT_DROP_ROUND),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rate_limit_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.drop_round, Duration::from_millis(200));
    }

    #[test]
    fn test_config_serialization() {
        let config = RateLimitConfig {
            drop_round: Duration::from_millis(50),
        };

        let toml = toml::to_string(&config).unwrap();
        let deserialized: RateLimitConfig = toml::from_str(&toml).unwrap();

        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: RateLimitConfig = toml::from_str("").unwrap();
        assert_eq!(config, RateLimitConfig::default());

        let config: RateLimitConfig = toml::from_str(r#"drop_round = "1s""#).unwrap();
        assert_eq!(config.drop_round, Duration::from_secs(1));
    }

    #[test]
    fn test_from_options() {
        assert_eq!(RateLimitConfig::from_options(None), RateLimitConfig::default());
        assert_eq!(
            RateLimitConfig::from_options(Some(Duration::ZERO)).drop_round,
            Duration::ZERO
        );
    }
}
