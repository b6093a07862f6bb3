use std::time::Duration;

use anyhow::{bail, ensure};
use serde::{Deserialize, Serialize};

use crate::{
    prelude::*,
    strategy::{LocationStrategy, StrategyName},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
#[serde(default)]
/// Tunables for location acquisition
pub struct LocationSettings {
    /// How long a cached fix is trusted without asking the device
    pub fresh_cache_seconds: u32,
    /// How long a cached fix may still be used as a fallback when the device fails
    pub stale_cache_seconds: u32,
    /// Upper bound on the time spent on one request, progressive requests included
    pub max_total_time_ms: u32,
    /// Strategies to pick from, progressive requests run them in this order
    pub strategies: Vec<LocationStrategy>,
}

impl LocationSettings {
    pub fn fresh_ttl(&self) -> Duration {
        Duration::from_secs(self.fresh_cache_seconds as u64)
    }

    pub fn stale_ttl(&self) -> Duration {
        Duration::from_secs(self.stale_cache_seconds as u64)
    }

    pub fn validate(&self) -> Result {
        ensure!(
            self.fresh_cache_seconds <= self.stale_cache_seconds,
            "Fresh cache window ({}s) can't be longer than the stale window ({}s)",
            self.fresh_cache_seconds,
            self.stale_cache_seconds
        );
        ensure!(self.max_total_time_ms > 0, "Total time budget must be nonzero");
        ensure!(!self.strategies.is_empty(), "At least one strategy is required");

        for strategy in self.strategies.iter() {
            if strategy.name == StrategyName::Cached {
                bail!("Cached is not a valid strategy name");
            }
            ensure!(
                strategy.timeout_ms > 0,
                "Strategy {:?} needs a nonzero timeout",
                strategy.name
            );
            ensure!(
                strategy.expected_accuracy_meters.is_finite()
                    && strategy.expected_accuracy_meters > 0.0,
                "Strategy {:?} has an invalid expected accuracy",
                strategy.name
            );
        }

        Ok(())
    }
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            fresh_cache_seconds: 2 * 60,
            stale_cache_seconds: 10 * 60,
            max_total_time_ms: 20_000,
            strategies: LocationStrategy::defaults(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let settings = LocationSettings::default();
        settings.validate().expect("Defaults should validate");
        assert_eq!(settings.fresh_ttl(), Duration::from_secs(120));
        assert_eq!(settings.stale_ttl(), Duration::from_secs(600));
    }

    #[test]
    fn test_rejects_inverted_windows() {
        let settings = LocationSettings {
            fresh_cache_seconds: 700,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_strategies() {
        let empty = LocationSettings {
            strategies: vec![],
            ..Default::default()
        };
        assert!(empty.validate().is_err());

        let mut zero_timeout = LocationSettings::default();
        zero_timeout.strategies[0].timeout_ms = 0;
        assert!(zero_timeout.validate().is_err());

        let mut cached = LocationSettings::default();
        cached.strategies[1].name = StrategyName::Cached;
        assert!(cached.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: LocationSettings =
            serde_json::from_str(r#"{ "fresh_cache_seconds": 30 }"#).expect("Failed to parse");
        assert_eq!(settings.fresh_cache_seconds, 30);
        assert_eq!(settings.stale_cache_seconds, 600);
        assert_eq!(settings.strategies.len(), 3);
    }
}
