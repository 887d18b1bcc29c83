//! Store configuration: retention and compaction tunables.
//!
//! These are process-internal knobs, fixed at store construction. They can be
//! built in code or loaded from a JSON file:
//!
//! ```json
//! {
//!   "retention": { "ttl": 600.0, "max_series": 0 },
//!   "compaction": { "max_overlay_depth": 8, "max_overlay_writes": 50000 }
//! }
//! ```
//!
//! Durations are written as (fractional) seconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Default idle time after which a series is evicted during compaction.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Default overlay stack depth that triggers compaction.
pub const DEFAULT_MAX_OVERLAY_DEPTH: usize = 8;

/// Default cumulative overlay write count that triggers compaction.
pub const DEFAULT_MAX_OVERLAY_WRITES: usize = 50_000;

/// Complete store configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// When series are dropped.
    #[serde(default)]
    pub retention: RetentionPolicy,

    /// When overlays are merged into the base layer.
    #[serde(default)]
    pub compaction: CompactionPolicy,
}

impl StoreConfig {
    /// Validates the configuration.
    ///
    /// Negative durations cannot be represented and are rejected while
    /// decoding, so only the compaction thresholds need checking here.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidParameter`] if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        self.compaction.validate()
    }

    /// Reads and validates a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read,
    /// [`ConfigError::Decode`] if it is not a valid config document, or
    /// [`ConfigError::InvalidParameter`] if validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;

        let config: StoreConfig = serde_json::from_str(&json).map_err(|e| ConfigError::Decode {
            path: path.display().to_string(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }
}

/// Series retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Series idle longer than this are evicted at the next compaction.
    ///
    /// Zero disables TTL eviction.
    #[serde(with = "duration_serde")]
    pub ttl: Duration,

    /// Upper bound on retained series; least recently written go first.
    ///
    /// Zero means unlimited.
    pub max_series: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_series: 0,
        }
    }
}

/// Overlay compaction thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionPolicy {
    /// Compact when the overlay stack is deeper than this.
    pub max_overlay_depth: usize,

    /// Compact when the overlays together hold more writes than this.
    pub max_overlay_writes: usize,
}

impl CompactionPolicy {
    /// Validates this policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidParameter`] if either threshold is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_overlay_depth == 0 {
            return Err(ConfigError::InvalidParameter {
                field: "max_overlay_depth",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }

        if self.max_overlay_writes == 0 {
            return Err(ConfigError::InvalidParameter {
                field: "max_overlay_writes",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Returns `true` if a stack of `depth` overlays holding `writes` writes
    /// should be compacted.
    pub fn exceeded(&self, depth: usize, writes: usize) -> bool {
        depth > self.max_overlay_depth || writes > self.max_overlay_writes
    }
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            max_overlay_depth: DEFAULT_MAX_OVERLAY_DEPTH,
            max_overlay_writes: DEFAULT_MAX_OVERLAY_WRITES,
        }
    }
}

/// Durations as seconds (f64). Negative or non-finite values are rejected.
mod duration_serde {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(|_| {
            D::Error::custom(format!(
                "invalid duration {seconds}: must be a non-negative number of seconds"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MetrixError;

    #[test]
    fn test_defaults_are_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retention.ttl, DEFAULT_TTL);
        assert_eq!(config.retention.max_series, 0);
        assert_eq!(config.compaction.max_overlay_depth, DEFAULT_MAX_OVERLAY_DEPTH);
    }

    #[test]
    fn test_zero_thresholds_rejected() {
        let mut config = StoreConfig::default();
        config.compaction.max_overlay_depth = 0;
        assert!(matches!(
            config.validate(),
            Err(MetrixError::Config(ConfigError::InvalidParameter {
                field: "max_overlay_depth",
                ..
            }))
        ));

        let mut config = StoreConfig::default();
        config.compaction.max_overlay_writes = 0;
        assert!(matches!(
            config.validate(),
            Err(MetrixError::Config(ConfigError::InvalidParameter {
                field: "max_overlay_writes",
                ..
            }))
        ));
    }

    #[test]
    fn test_exceeded_is_strict() {
        let policy = CompactionPolicy {
            max_overlay_depth: 2,
            max_overlay_writes: 10,
        };
        assert!(!policy.exceeded(2, 10));
        assert!(policy.exceeded(3, 0));
        assert!(policy.exceeded(1, 11));
    }

    #[test]
    fn test_json_round_trip_uses_seconds() {
        let config = StoreConfig {
            retention: RetentionPolicy {
                ttl: Duration::from_millis(1500),
                max_series: 100,
            },
            compaction: CompactionPolicy::default(),
        };

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["retention"]["ttl"], 1.5);

        let back: StoreConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_negative_ttl_rejected() {
        let json = r#"{"retention": {"ttl": -1.0, "max_series": 0}}"#;
        assert!(serde_json::from_str::<StoreConfig>(json).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrix.json");
        std::fs::write(
            &path,
            r#"{
                "retention": {"ttl": 5, "max_series": 10},
                "compaction": {"max_overlay_depth": 1, "max_overlay_writes": 1}
            }"#,
        )
        .unwrap();

        let config = StoreConfig::load(&path).unwrap();
        assert_eq!(config.retention.ttl, Duration::from_secs(5));
        assert_eq!(config.retention.max_series, 10);
        assert_eq!(config.compaction.max_overlay_depth, 1);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();

        let missing = StoreConfig::load(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(MetrixError::Config(ConfigError::Read { .. }))));

        let garbage = dir.path().join("garbage.json");
        std::fs::write(&garbage, "not json").unwrap();
        assert!(matches!(
            StoreConfig::load(&garbage),
            Err(MetrixError::Config(ConfigError::Decode { .. }))
        ));

        let invalid = dir.path().join("invalid.json");
        std::fs::write(
            &invalid,
            r#"{"compaction": {"max_overlay_depth": 0, "max_overlay_writes": 1}}"#,
        )
        .unwrap();
        assert!(matches!(
            StoreConfig::load(&invalid),
            Err(MetrixError::Config(ConfigError::InvalidParameter { .. }))
        ));
    }
}
