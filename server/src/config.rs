use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use thiserror::Error;
use tracing::Level;

/// Configuration for the ledger server, read from YAML.
///
/// Every field has a default, so an empty mapping (`{}`) is a valid file.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Period of the retry worker draining residual funds.
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    /// Write snapshots to `snapshot_path`. When false the ledger lives in
    /// memory only.
    #[serde(default = "default_persist")]
    pub persist: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
}

#[derive(Clone, Debug)]
pub struct ValidatedConfig {
    pub port: u16,
    pub sync_interval: Duration,
    /// Where snapshots go, if persistence is enabled.
    pub snapshot_path: Option<PathBuf>,
    pub log_level: Level,
    pub log_json: bool,
}

fn default_port() -> u16 {
    8000
}

fn default_sync_interval_ms() -> u64 {
    1_000
}

fn default_snapshot_path() -> String {
    "dump.db".to_string()
}

fn default_persist() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            sync_interval_ms: default_sync_interval_ms(),
            snapshot_path: default_snapshot_path(),
            persist: default_persist(),
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        if self.sync_interval_ms == 0 {
            return Err(ConfigError::InvalidNonZero {
                field: "sync_interval_ms",
                value: self.sync_interval_ms,
            });
        }
        if self.persist && self.snapshot_path.is_empty() {
            return Err(ConfigError::Empty {
                field: "snapshot_path",
            });
        }
        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;

        Ok(ValidatedConfig {
            port: self.port,
            sync_interval: Duration::from_millis(self.sync_interval_ms),
            snapshot_path: self.persist.then(|| PathBuf::from(self.snapshot_path)),
            log_level,
            log_json: self.log_json,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, Config::default());

        let validated = config.validate().unwrap();
        assert_eq!(validated.port, 8000);
        assert_eq!(validated.sync_interval, Duration::from_secs(1));
        assert_eq!(validated.snapshot_path, Some(PathBuf::from("dump.db")));
        assert_eq!(validated.log_level, Level::INFO);
        assert!(!validated.log_json);
    }

    #[test]
    fn test_overrides() {
        let config: Config = serde_yaml::from_str(
            "port: 9001\nsync_interval_ms: 250\npersist: false\nlog_level: debug\nlog_json: true\n",
        )
        .unwrap();
        let validated = config.validate().unwrap();
        assert_eq!(validated.port, 9001);
        assert_eq!(validated.sync_interval, Duration::from_millis(250));
        assert_eq!(validated.snapshot_path, None);
        assert_eq!(validated.log_level, Level::DEBUG);
        assert!(validated.log_json);
    }

    #[test]
    fn test_rejects_invalid() {
        let config = Config {
            sync_interval_ms: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidNonZero {
                field: "sync_interval_ms",
                value: 0
            })
        ));

        let config = Config {
            log_level: "loud".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel { .. })
        ));

        let config = Config {
            snapshot_path: String::new(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Empty { .. })));

        assert!(serde_yaml::from_str::<Config>("port: many").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join("backer-config-does-not-exist.yaml");
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::Read { .. })
        ));
    }
}
