//! Fire-and-forget telemetry hand-off.
//!
//! Request handlers push records into a bounded queue without waiting; one
//! writer on the blocking pool drains it into the store in batches.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::store::{TelemetryRecord, TelemetryStore};
use super::TelemetryError;

/// Most records written per transaction
const MAX_BATCH: usize = 256;

/// Cheap to clone; one per request handler that reports telemetry.
#[derive(Debug, Clone)]
pub struct TelemetryRecorder {
    tx: mpsc::Sender<TelemetryRecord>,
}

/// The writer task. Finishes once every recorder has been dropped and the
/// queue is drained.
pub struct TelemetryWriter {
    task: JoinHandle<TelemetryStore>,
}

impl TelemetryRecorder {
    pub fn spawn(store: TelemetryStore, queue: usize) -> (Self, TelemetryWriter) {
        let (tx, rx) = mpsc::channel(queue);
        let task = tokio::task::spawn_blocking(move || write_loop(store, rx));
        (Self { tx }, TelemetryWriter { task })
    }

    /// Queue a record. Never waits; a full queue drops the record.
    pub fn record(&self, record: TelemetryRecord) {
        if let Err(e) = self.try_record(record) {
            warn!("Dropping telemetry record: {}", e);
        }
    }

    pub fn try_record(&self, record: TelemetryRecord) -> Result<(), TelemetryError> {
        self.tx.try_send(record).map_err(|e| match e {
            TrySendError::Full(_) => TelemetryError::QueueFull,
            TrySendError::Closed(_) => TelemetryError::Closed,
        })
    }
}

impl TelemetryWriter {
    /// Wait for the queue to drain and get the store back.
    pub async fn finish(self) -> Result<TelemetryStore, TelemetryError> {
        self.task.await.map_err(|e| {
            error!("Telemetry writer crashed: {}", e);
            TelemetryError::Closed
        })
    }
}

fn write_loop(mut store: TelemetryStore, mut rx: mpsc::Receiver<TelemetryRecord>) -> TelemetryStore {
    let mut batch = Vec::with_capacity(MAX_BATCH);
    while let Some(first) = rx.blocking_recv() {
        batch.push(first);
        while batch.len() < MAX_BATCH {
            match rx.try_recv() {
                Ok(record) => batch.push(record),
                Err(_) => break,
            }
        }

        match store.upsert_batch(&batch) {
            Ok(n) => debug!("Wrote {} telemetry records", n),
            Err(e) => error!("Failed to write {} telemetry records: {}", batch.len(), e),
        }
        batch.clear();
    }
    store
}
