//! Manifest document schema.
//!
//! The manifest lives next to the packages (usually `packages/version.json`)
//! and is written by the release tooling.

use serde::{Deserialize, Serialize};

/// One published release and the package file that carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: String,
    /// Relative to the package store directory.
    pub path: String,
}

/// Both manifest shapes in use: a list of releases, or a single release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestDocument {
    Catalog { versions: Vec<VersionEntry> },
    Single(VersionEntry),
}

impl ManifestDocument {
    pub fn into_entries(self) -> Vec<VersionEntry> {
        match self {
            ManifestDocument::Catalog { versions } => versions,
            ManifestDocument::Single(entry) => vec![entry],
        }
    }
}
