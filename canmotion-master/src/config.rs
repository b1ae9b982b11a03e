//! Master configuration

use std::time::Duration;

use serde::Deserialize;
use snafu::ResultExt;

use canmotion_common::constants::values;

use crate::master::{ConfigParseSnafu, MasterError};

/// Timing configuration for the master
///
/// Deserializable from TOML so applications can load it from a file; all fields have defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MasterConfig {
    /// Period of the sync loop, in milliseconds
    ///
    /// Also written to each drive as its interpolation time period, so it must fit in a byte.
    pub sync_period_ms: u64,
    /// Settle delay between configuration SDO writes during initialization, in milliseconds
    pub settle_delay_ms: u64,
    /// Heartbeat producer period configured on each drive, in milliseconds
    pub heartbeat_ms: u16,
    /// Bound on driving a single drive to a target profile state, in milliseconds
    ///
    /// None means drive forever, matching the traditional blocking behavior.
    pub drive_timeout_ms: Option<u64>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            sync_period_ms: 10,
            settle_delay_ms: 100,
            heartbeat_ms: values::HEARTBEAT_TIME_MS,
            drive_timeout_ms: None,
        }
    }
}

impl MasterConfig {
    /// Parse a config from a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self, MasterError> {
        toml::from_str(s).context(ConfigParseSnafu)
    }

    /// The sync loop period
    pub fn sync_period(&self) -> Duration {
        Duration::from_millis(self.sync_period_ms)
    }

    /// The settle delay between configuration writes
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// The drive-to-state bound, None for unbounded
    pub fn drive_bound(&self) -> Option<Duration> {
        self.drive_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MasterConfig::default();
        assert_eq!(Duration::from_millis(10), config.sync_period());
        assert_eq!(Duration::from_millis(100), config.settle_delay());
        assert_eq!(1601, config.heartbeat_ms);
        assert_eq!(None, config.drive_bound());
    }

    #[test]
    fn test_parse_toml() {
        let config = MasterConfig::from_toml_str(
            "sync_period_ms = 20\ndrive_timeout_ms = 5000\n",
        )
        .unwrap();
        assert_eq!(Duration::from_millis(20), config.sync_period());
        assert_eq!(Some(Duration::from_secs(5)), config.drive_bound());
        // Unspecified fields fall back to defaults
        assert_eq!(100, config.settle_delay_ms);

        assert!(MasterConfig::from_toml_str("no_such_field = 1").is_err());
    }
}
