//! Snapshot Types
//!
//! The immutable result of one successful manifest load.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// A version from the manifest with its package file resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRef {
    /// Version exactly as written in the manifest
    pub version: String,
    pub precedence: semver::Version,
    /// Path as written in the manifest, relative to the package store
    pub relative_path: String,
    /// Path inside the package store
    pub path: PathBuf,
}

impl PackageRef {
    /// Base name offered to clients as the attachment file name.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

/// Published manifest state. Superseded, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    package_dir: PathBuf,
    packages: Vec<PackageRef>,
    loaded_at: DateTime<Utc>,
}

impl Snapshot {
    /// `packages` must already be in descending precedence order.
    pub fn new(package_dir: PathBuf, packages: Vec<PackageRef>, loaded_at: DateTime<Utc>) -> Self {
        Self {
            package_dir,
            packages,
            loaded_at,
        }
    }

    pub fn latest(&self) -> Option<&PackageRef> {
        self.packages.first()
    }

    /// Look up a servable version by its manifest spelling.
    pub fn find(&self, version: &str) -> Option<&PackageRef> {
        self.packages.iter().find(|p| p.version == version)
    }

    /// Package store the paths were resolved against
    pub fn package_dir(&self) -> &Path {
        &self.package_dir
    }

    pub fn packages(&self) -> &[PackageRef] {
        &self.packages
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Same servable content, ignoring when it was loaded.
    pub fn same_packages(&self, other: &Snapshot) -> bool {
        self.packages == other.packages
    }
}
