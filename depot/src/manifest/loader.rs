//! Manifest Loader
//!
//! Reads the versions manifest, validates every entry, orders releases by
//! semantic version precedence and resolves package paths.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::Utc;
use depot_protocol::{ManifestDocument, VersionEntry};
use tracing::debug;

use super::types::{PackageRef, Snapshot};
use super::version::{descending, parse_version};
use crate::common::resolve_package_path;
use crate::config::{DepotConfig, ServeMode};

/// Default size cap for a manifest file (1MB)
pub const DEFAULT_MAX_MANIFEST_BYTES: u64 = 1_000_000;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read manifest {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Manifest {path:?} too large (max {max} bytes)")]
    TooLarge { path: PathBuf, max: u64 },

    #[error("Failed to parse manifest {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid version {version:?}: {source}")]
    InvalidVersion {
        version: String,
        #[source]
        source: semver::Error,
    },

    #[error("Package path {path:?} for version {version} escapes the package store")]
    UnsafePath { version: String, path: String },

    #[error("No versions found")]
    Empty,

    #[error("Manifest load task failed: {0}")]
    Task(String),
}

/// Reads one manifest file into a [`Snapshot`].
///
/// Loading has no side effects beyond reading the file, so it is safe to
/// call from any thread at any rate.
#[derive(Debug, Clone)]
pub struct ManifestLoader {
    manifest_path: PathBuf,
    package_dir: PathBuf,
    mode: ServeMode,
    max_bytes: u64,
}

impl ManifestLoader {
    pub fn new(manifest_path: PathBuf, package_dir: PathBuf, mode: ServeMode) -> Self {
        Self {
            manifest_path,
            package_dir,
            mode,
            max_bytes: DEFAULT_MAX_MANIFEST_BYTES,
        }
    }

    pub fn from_config(config: &DepotConfig) -> Self {
        Self::new(config.manifest_path(), config.package_dir.clone(), config.mode)
            .with_max_bytes(config.max_manifest_bytes)
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn load(&self) -> Result<Snapshot, LoadError> {
        let entries = self.read_entries()?;
        let packages = select_packages(entries, &self.package_dir, self.mode)?;

        debug!(
            "Loaded manifest {:?}: {} servable versions",
            self.manifest_path,
            packages.len()
        );
        Ok(Snapshot::new(self.package_dir.clone(), packages, Utc::now()))
    }

    fn read_entries(&self) -> Result<Vec<VersionEntry>, LoadError> {
        let io_err = |source| LoadError::Io {
            path: self.manifest_path.clone(),
            source,
        };

        let file = File::open(&self.manifest_path).map_err(io_err)?;
        let mut content = Vec::new();
        file.take(self.max_bytes.saturating_add(1))
            .read_to_end(&mut content)
            .map_err(io_err)?;

        if content.len() as u64 > self.max_bytes {
            return Err(LoadError::TooLarge {
                path: self.manifest_path.clone(),
                max: self.max_bytes,
            });
        }

        let document: ManifestDocument =
            serde_json::from_slice(&content).map_err(|source| LoadError::Parse {
                path: self.manifest_path.clone(),
                source,
            })?;

        Ok(document.into_entries())
    }
}

/// Validate, order and resolve manifest entries.
///
/// One malformed version rejects the whole manifest, so a typo can never
/// promote the wrong release to "latest". In [`ServeMode::Latest`] only the
/// winner is kept (and only its path has to resolve).
pub fn select_packages(
    entries: Vec<VersionEntry>,
    package_dir: &Path,
    mode: ServeMode,
) -> Result<Vec<PackageRef>, LoadError> {
    let mut parsed = Vec::with_capacity(entries.len());
    for entry in entries {
        let precedence =
            parse_version(&entry.version).map_err(|source| LoadError::InvalidVersion {
                version: entry.version.clone(),
                source,
            })?;
        parsed.push((entry, precedence));
    }

    if parsed.is_empty() && mode == ServeMode::Latest {
        return Err(LoadError::Empty);
    }

    // Stable: equal versions keep manifest order.
    parsed.sort_by(|(_, a), (_, b)| descending(a, b));
    if mode == ServeMode::Latest {
        parsed.truncate(1);
    }

    parsed
        .into_iter()
        .map(|(entry, precedence)| {
            let path = resolve_package_path(package_dir, &entry.path).ok_or_else(|| {
                LoadError::UnsafePath {
                    version: entry.version.clone(),
                    path: entry.path.clone(),
                }
            })?;
            Ok(PackageRef {
                // Served and matched without the manifest's stray whitespace.
                version: entry.version.trim().to_string(),
                precedence,
                relative_path: entry.path,
                path,
            })
        })
        .collect()
}
