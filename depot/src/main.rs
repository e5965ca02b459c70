use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use depot_lib::config::{DepotConfig, ServeMode};
use depot_lib::{logging, Depot};

#[derive(Parser, Debug)]
#[command(name = "depot", version, about = "Package version server")]
struct Args {
    /// JSON config file; every field is optional
    #[arg(long, env = "DEPOT_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "DEPOT_LISTEN")]
    listen: Option<SocketAddr>,

    #[arg(long, env = "DEPOT_PACKAGE_DIR")]
    package_dir: Option<PathBuf>,

    /// Defaults to <package-dir>/version.json
    #[arg(long, env = "DEPOT_MANIFEST")]
    manifest: Option<PathBuf>,

    #[arg(long, env = "DEPOT_LOG_FILE", conflicts_with = "log_stdout")]
    log_file: Option<PathBuf>,

    /// Log to stdout instead of a file
    #[arg(long)]
    log_stdout: bool,

    #[arg(long, value_enum, env = "DEPOT_MODE")]
    mode: Option<ServeMode>,

    #[arg(long, env = "DEPOT_MAX_IN_FLIGHT")]
    max_in_flight: Option<usize>,

    /// SQLite database for client version reports
    #[arg(long, env = "DEPOT_TELEMETRY_DB")]
    telemetry_db: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<DepotConfig> {
        let mut config = match &self.config {
            Some(path) => DepotConfig::load(path)?,
            None => DepotConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(dir) = self.package_dir {
            config.package_dir = dir;
        }
        if let Some(manifest) = self.manifest {
            config.manifest_path = Some(manifest);
        }
        if self.log_stdout {
            config.log_file = None;
        } else if let Some(log_file) = self.log_file {
            config.log_file = Some(log_file);
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(max) = self.max_in_flight {
            config.max_in_flight = max;
        }
        if let Some(db) = self.telemetry_db {
            config.telemetry_db = Some(db);
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;
    logging::init(config.log_file.as_deref())?;

    info!(
        listen = %config.listen,
        mode = ?config.mode,
        max_in_flight = config.max_in_flight,
        "Starting depot"
    );

    let depot = Depot::start(config).await.map_err(|e| {
        error!("Failed to start: {:#}", e);
        e
    })?;
    let shutdown = depot.shutdown_handle();

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        shutdown.trigger();
    });

    depot.run().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
