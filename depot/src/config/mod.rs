//! Configuration management
//!
//! Server settings read from an optional JSON file, with every field
//! defaulted so an empty file (or none at all) gives a working depot.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default package store directory
pub const DEFAULT_PACKAGE_DIR: &str = "./packages";
/// Manifest file name inside the package store
pub const MANIFEST_FILE_NAME: &str = "version.json";
pub const DEFAULT_LOG_FILE: &str = "./log.txt";
pub const DEFAULT_PORT: u16 = 38686;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 2000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Which part of the manifest the depot serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ServeMode {
    /// Only the newest version is downloadable; a manifest with no
    /// versions fails to load.
    #[default]
    Latest,
    /// Every listed version is downloadable; an empty manifest loads as
    /// "no versions published".
    Catalog,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DepotConfig {
    pub listen: SocketAddr,
    pub package_dir: PathBuf,
    /// Defaults to `<package_dir>/version.json`
    pub manifest_path: Option<PathBuf>,
    /// JSON log lines go here; stdout when unset
    pub log_file: Option<PathBuf>,
    pub mode: ServeMode,
    pub max_in_flight: usize,
    pub reload_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub max_manifest_bytes: u64,
    /// Telemetry recording is off unless a database path is given
    pub telemetry_db: Option<PathBuf>,
    pub telemetry_queue: usize,
    pub trust_forwarded_for: bool,
}

impl Default for DepotConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            package_dir: PathBuf::from(DEFAULT_PACKAGE_DIR),
            manifest_path: None,
            log_file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
            mode: ServeMode::Latest,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            reload_interval_ms: 1000,
            request_timeout_secs: 30,
            download_timeout_secs: 600,
            max_manifest_bytes: 1_000_000,
            telemetry_db: None,
            telemetry_queue: 4096,
            trust_forwarded_for: false,
        }
    }
}

impl DepotConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.reload_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "reload_interval_ms must be positive".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 || self.download_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".to_string()));
        }
        if self.telemetry_queue == 0 {
            return Err(ConfigError::Invalid(
                "telemetry_queue must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.manifest_path
            .clone()
            .unwrap_or_else(|| self.package_dir.join(MANIFEST_FILE_NAME))
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_millis(self.reload_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = DepotConfig::default();
        assert_eq!(config.listen.port(), 38686);
        assert_eq!(config.max_in_flight, 2000);
        assert_eq!(config.reload_interval(), Duration::from_secs(1));
        assert_eq!(config.manifest_path(), PathBuf::from("./packages/version.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"package_dir": "/srv/pkg", "mode": "catalog", "max_in_flight": 64}}"#
        )
        .unwrap();

        let config = DepotConfig::load(file.path()).unwrap();
        assert_eq!(config.mode, ServeMode::Catalog);
        assert_eq!(config.max_in_flight, 64);
        assert_eq!(config.manifest_path(), PathBuf::from("/srv/pkg/version.json"));
        assert_eq!(config.reload_interval_ms, 1000);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_inflight": 64}}"#).unwrap();
        assert!(matches!(
            DepotConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = DepotConfig::load(Path::new("/nonexistent/depot.json"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = DepotConfig {
            max_in_flight: 0,
            ..DepotConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
