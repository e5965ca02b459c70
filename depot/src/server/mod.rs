//! HTTP Server
//!
//! Routes version queries and package downloads behind admission control.
//!
//! Routes: `/latest_version`, `/download`, `/download/:version`,
//! `/version?q=`, `/versions`, `/status`.

pub mod admission;
pub mod body;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{middleware, Router};
use depot_protocol::routes;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use admission::{admission_middleware, AdmissionController, HeldPermit, Permit};

use crate::manifest::SnapshotCache;
use crate::telemetry::TelemetryRecorder;

/// Per-request settings fixed at startup
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub request_timeout: Duration,
    pub download_timeout: Duration,
    pub trust_forwarded_for: bool,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(600),
            trust_forwarded_for: false,
        }
    }
}

/// State shared by every handler. Handlers only read from it.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<SnapshotCache>,
    pub admission: Arc<AdmissionController>,
    pub telemetry: Option<TelemetryRecorder>,
    pub settings: Arc<HandlerSettings>,
}

pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route(routes::LATEST_VERSION, get(handlers::latest_version))
        .route(routes::DOWNLOAD, get(handlers::download_latest))
        .route(routes::DOWNLOAD_VERSION, get(handlers::download))
        .route(routes::VERSION_REPORT, get(handlers::report_version))
        .route(routes::VERSIONS, get(handlers::versions))
        .route(routes::STATUS, get(handlers::status))
        .fallback(handlers::not_found);

    with_layers(router, state)
}

/// Wrap `routes` in the request-level middleware stack.
fn with_layers(routes: Router<AppState>, state: AppState) -> Router {
    let admission = Arc::clone(&state.admission);
    let request_timeout = state.settings.request_timeout;

    routes
        // Innermost first: a panicking handler becomes a 500 before the
        // admission middleware sees the response.
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn_with_state(admission, admission_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Triggers a graceful stop of a running [`DepotServer`].
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

pub struct DepotServer {
    state: AppState,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl DepotServer {
    pub fn new(state: AppState) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            state,
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Serve until shutdown is signalled, then let in-flight requests finish.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        info!("Depot server listening on {}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                // Also resolves if a shutdown was requested before we got here.
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
                info!("Depot server shutting down");
            })
            .await
    }
}
