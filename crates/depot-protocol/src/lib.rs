pub mod client;
pub mod manifest;
pub mod routes;

pub use client::{ClientError, DepotClient, Poll};
pub use manifest::{ManifestDocument, VersionEntry};
