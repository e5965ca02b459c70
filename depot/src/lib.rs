//! Depot
//!
//! Serves the newest published package version (or a whole catalog of
//! versions) from a manifest that is re-read every second, with a hard cap
//! on requests in flight and optional client version telemetry.

pub mod common;
pub mod config;
pub mod logging;
pub mod manifest;
pub mod server;
pub mod telemetry;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use config::DepotConfig;
use manifest::{ManifestLoader, Reloader, ReloaderHandle, SnapshotCache};
use server::{AdmissionController, AppState, DepotServer, HandlerSettings, ShutdownHandle};
use telemetry::{TelemetryRecorder, TelemetryStore, TelemetryWriter};

/// How long shutdown waits for queued telemetry to reach the database
const TELEMETRY_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A bound, running depot: reloader started, listener open, not yet serving.
pub struct Depot {
    server: DepotServer,
    listener: TcpListener,
    reloader: ReloaderHandle,
    telemetry: Option<TelemetryWriter>,
}

impl Depot {
    pub async fn start(config: DepotConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let (recorder, writer) = match &config.telemetry_db {
            Some(path) => {
                let store = TelemetryStore::open(path)
                    .with_context(|| format!("opening telemetry database {:?}", path))?;
                info!("Recording client telemetry to {:?}", path);
                let (recorder, writer) = TelemetryRecorder::spawn(store, config.telemetry_queue);
                (Some(recorder), Some(writer))
            }
            None => (None, None),
        };

        let cache = Arc::new(SnapshotCache::new());
        let loader = ManifestLoader::from_config(&config);
        let reloader = Reloader::new(loader, Arc::clone(&cache), config.reload_interval())
            .start()
            .await;

        let state = AppState {
            cache,
            admission: AdmissionController::new(config.max_in_flight),
            telemetry: recorder,
            settings: Arc::new(HandlerSettings {
                request_timeout: config.request_timeout(),
                download_timeout: config.download_timeout(),
                trust_forwarded_for: config.trust_forwarded_for,
            }),
        };

        let listener = match TcpListener::bind(config.listen).await {
            Ok(listener) => listener,
            Err(e) => {
                reloader.stop().await;
                return Err(e).with_context(|| format!("binding {}", config.listen));
            }
        };

        Ok(Self {
            server: DepotServer::new(state),
            listener,
            reloader,
            telemetry: writer,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.server.shutdown_handle()
    }

    /// Serve until shut down, then stop the reloader and flush telemetry.
    pub async fn run(self) -> anyhow::Result<()> {
        let Depot {
            server,
            listener,
            reloader,
            telemetry,
        } = self;

        let served = server.serve(listener).await;
        reloader.stop().await;

        // Last recorder clones live in the server state.
        drop(server);
        if let Some(writer) = telemetry {
            match tokio::time::timeout(TELEMETRY_DRAIN_TIMEOUT, writer.finish()).await {
                Ok(Ok(_)) => info!("Telemetry flushed"),
                Ok(Err(e)) => warn!("Telemetry writer failed: {}", e),
                Err(_) => warn!("Timed out flushing telemetry"),
            }
        }

        served.context("serving HTTP")
    }
}
