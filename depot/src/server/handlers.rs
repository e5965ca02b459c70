//! Request Handlers
//!
//! Every handler reads the snapshot once and answers from that one view.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::admission::HeldPermit;
use super::body::package_attachment;
use super::AppState;
use crate::common::{DepotError, DepotResult};
use crate::manifest::Snapshot;
use crate::telemetry::TelemetryRecord;

/// Header a client can use to identify itself for telemetry
pub const CLIENT_ID_HEADER: &str = "x-client-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

fn current_snapshot(state: &AppState) -> DepotResult<std::sync::Arc<Snapshot>> {
    state.cache.current().ok_or(DepotError::NotLoaded)
}

/// `GET /latest_version`
pub async fn latest_version(State(state): State<AppState>) -> DepotResult<String> {
    let snapshot = current_snapshot(&state)?;
    let latest = snapshot.latest().ok_or(DepotError::NoVersions)?;
    Ok(latest.version.clone())
}

/// `GET /download/:version`
pub async fn download(
    State(state): State<AppState>,
    Path(version): Path<String>,
    permit: Option<Extension<HeldPermit>>,
) -> DepotResult<Response> {
    let snapshot = current_snapshot(&state)?;
    let package = snapshot
        .find(&version)
        .ok_or_else(|| DepotError::NotFound(version.clone()))?;

    package_attachment(
        package,
        snapshot.package_dir(),
        state.settings.download_timeout,
        permit.map(|Extension(p)| p),
    )
    .await
}

/// `GET /download`: whatever is latest right now.
pub async fn download_latest(
    State(state): State<AppState>,
    permit: Option<Extension<HeldPermit>>,
) -> DepotResult<Response> {
    let snapshot = current_snapshot(&state)?;
    let package = snapshot.latest().ok_or(DepotError::NoVersions)?;

    package_attachment(
        package,
        snapshot.package_dir(),
        state.settings.download_timeout,
        permit.map(|Extension(p)| p),
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct VersionQuery {
    #[serde(default)]
    pub q: String,
}

/// `GET /version?q=<client version>`
///
/// Answers like `/latest_version`. A non-empty `q` is queued for the
/// telemetry store; queuing never waits and its failures are only logged.
pub async fn report_version(
    State(state): State<AppState>,
    Query(query): Query<VersionQuery>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> DepotResult<String> {
    let snapshot = current_snapshot(&state)?;
    let latest = snapshot.latest().ok_or(DepotError::NoVersions)?;

    let reported = query.q.trim();
    if !reported.is_empty() {
        if let Some(recorder) = &state.telemetry {
            let peer = peer.map(|ConnectInfo(addr)| addr);
            match client_id(&headers, peer, state.settings.trust_forwarded_for) {
                Some(client) => recorder.record(TelemetryRecord::now(client, reported)),
                None => debug!("No client identifier, skipping telemetry"),
            }
        }
    }

    Ok(latest.version.clone())
}

/// Who is reporting: explicit client id, then the first forwarded hop (if
/// the proxy in front is trusted), then the peer address.
pub fn client_id(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded_for: bool,
) -> Option<String> {
    let header = move |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(id) = header(CLIENT_ID_HEADER) {
        return Some(id.to_string());
    }

    if trust_forwarded_for {
        let first_hop = header(FORWARDED_FOR_HEADER)
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(hop) = first_hop {
            return Some(hop.to_string());
        }
    }

    peer.map(|addr| addr.ip().to_string())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionsResponse {
    pub latest: Option<String>,
    pub versions: Vec<VersionListing>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionListing {
    pub version: String,
    pub file: String,
}

/// `GET /versions`: servable versions, newest first.
pub async fn versions(State(state): State<AppState>) -> DepotResult<Json<VersionsResponse>> {
    let snapshot = current_snapshot(&state)?;

    Ok(Json(VersionsResponse {
        latest: snapshot.latest().map(|p| p.version.clone()),
        versions: snapshot
            .packages()
            .iter()
            .map(|p| VersionListing {
                version: p.version.clone(),
                file: p.file_name().unwrap_or_default().to_string(),
            })
            .collect(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub loaded: bool,
    pub latest_version: Option<String>,
    pub loaded_at: Option<String>,
    pub in_flight: usize,
    pub capacity: usize,
    pub rejected_total: u64,
}

/// `GET /status`
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.cache.current();

    Json(StatusResponse {
        loaded: snapshot.is_some(),
        latest_version: snapshot
            .as_ref()
            .and_then(|s| s.latest())
            .map(|p| p.version.clone()),
        loaded_at: snapshot.as_ref().map(|s| s.loaded_at().to_rfc3339()),
        in_flight: state.admission.in_flight(),
        capacity: state.admission.capacity(),
        rejected_total: state.admission.rejected_total(),
    })
}

/// Unknown routes.
pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}
