//! Common Utilities
//!
//! Shared error types and path handling used across the depot.

pub mod error;
pub mod paths;
pub mod result;

pub use error::DepotError;
pub use paths::resolve_package_path;
pub use result::DepotResult;
