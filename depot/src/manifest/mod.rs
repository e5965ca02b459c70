//! Manifest System
//!
//! Loads the versions manifest, publishes it as an immutable snapshot, and
//! keeps that snapshot fresh from a background reloader.

pub mod cache;
pub mod loader;
pub mod reloader;
pub mod types;
pub mod version;

pub use cache::SnapshotCache;
pub use loader::{LoadError, ManifestLoader};
pub use reloader::{Reloader, ReloaderHandle};
pub use types::{PackageRef, Snapshot};
