//! Client Telemetry
//!
//! Last-seen version per client, recorded best-effort alongside version
//! queries. Recording failures are logged and never reach the client.

pub mod recorder;
pub mod store;

pub use recorder::{TelemetryRecorder, TelemetryWriter};
pub use store::{TelemetryRecord, TelemetryStore};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Telemetry queue full")]
    QueueFull,

    #[error("Telemetry writer stopped")]
    Closed,
}
