//! Disk-Sync Policy
//!
//! Per-slice configuration of when accumulated writes are pushed from memory
//! to the OS cache or the physical disk, and whether writers block until that
//! happens.
//!
//! ## Modes
//!
//! - `Disabled` - no background synchronization at all.
//! - `Cache` - flush chain buffers to the OS disk cache (fast, survives a
//!   process crash, not a power loss).
//! - `Disk` - flush and fsync (survives power loss, slowest).
//!
//! ## Triggers
//!
//! Three independent conditions, OR'd together, evaluated every
//! `check_interval`: accepted record count, uncompressed byte volume, and
//! time elapsed since the last sync. All must be positive when the mode is
//! enabled - a zero trigger is a configuration bug, not a runtime condition,
//! so constructors panic on it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Disabled,
    /// Flush to the OS disk cache only.
    Cache,
    /// Flush and fsync to the physical disk.
    Disk,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Disabled => f.write_str("disabled"),
            SyncMode::Cache => f.write_str("cache"),
            SyncMode::Disk => f.write_str("disk"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub mode: SyncMode,

    /// When true, a write blocks until the sync cycle covering it completes
    /// and receives that cycle's error. When false, writes return immediately
    /// and sync errors are only logged.
    pub wait: bool,

    /// How often trigger conditions are re-evaluated.
    #[serde(with = "duration_ms")]
    pub check_interval: Duration,

    /// Sync after this many accepted records.
    pub count_trigger: u64,

    /// Sync after this many uncompressed bytes.
    pub bytes_trigger: u64,

    /// Sync after this much time since the previous sync.
    #[serde(with = "duration_ms")]
    pub interval_trigger: Duration,
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::Disk,
            wait: true,
            check_interval: Duration::from_millis(5),
            count_trigger: 10_000,
            bytes_trigger: 1024 * 1024,
            interval_trigger: Duration::from_millis(100),
        }
    }
}

impl SyncConfig {
    /// All numeric fields must be positive when the mode is enabled.
    pub fn validate(&self) -> Result<()> {
        if self.mode == SyncMode::Disabled {
            return Ok(());
        }
        if self.check_interval.is_zero() {
            return Err(Error::InvalidConfig("checkInterval is not set".into()));
        }
        if self.count_trigger == 0 {
            return Err(Error::InvalidConfig("countTrigger is not set".into()));
        }
        if self.bytes_trigger == 0 {
            return Err(Error::InvalidConfig("bytesTrigger is not set".into()));
        }
        if self.interval_trigger.is_zero() {
            return Err(Error::InvalidConfig("intervalTrigger is not set".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SyncConfig::default().validate().is_ok());
    }

    #[test]
    fn disabled_mode_skips_trigger_validation() {
        let config = SyncConfig {
            mode: SyncMode::Disabled,
            count_trigger: 0,
            bytes_trigger: 0,
            check_interval: Duration::ZERO,
            interval_trigger: Duration::ZERO,
            wait: false,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn enabled_mode_rejects_zero_triggers() {
        let mut config = SyncConfig::default();
        config.count_trigger = 0;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.bytes_trigger = 0;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.check_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.interval_trigger = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let config = SyncConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let decoded: SyncConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, decoded);
    }
}
