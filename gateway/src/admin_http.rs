//! Admin/health HTTP surface (SPEC_FULL.md §10.D): the engine's only
//! outward-facing HTTP, distinct from the proxied traffic the engine
//! forwards. Grounded on the readiness contract of the teacher's
//! `forwarder/src/status_http.rs` (uplink/backend connectivity does not
//! affect `/readyz`) and the router composition style of
//! `services/server/src/lib.rs`'s `build_router`.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use proxy_core::frang::FrangLimiter;
use proxy_core::Registry;

#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<Registry>,
    pub frang: Arc<FrangLimiter>,
}

pub fn build_router(state: AdminState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/v1/status", get(status))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    "ok"
}

/// Readiness reflects local prerequisites only: the scheduler registry and
/// rule table are loaded. Upstream connectivity does NOT affect readiness,
/// matching the teacher's status server contract.
async fn readyz(State(state): State<AdminState>) -> impl IntoResponse {
    if state.registry.group_names().is_empty() {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "no server groups registered")
    } else {
        (axum::http::StatusCode::OK, "ready")
    }
}

#[derive(Serialize)]
struct ServerGroupStatus {
    name: String,
    connections: Vec<ConnStatus>,
}

#[derive(Serialize)]
struct ConnStatus {
    peer_addr: String,
    qsize: usize,
    live: bool,
}

#[derive(Serialize)]
struct StatusReport {
    server_groups: Vec<ServerGroupStatus>,
    frang_blocks: u64,
}

async fn status(State(state): State<AdminState>) -> impl IntoResponse {
    let server_groups = state
        .registry
        .group_names()
        .into_iter()
        .map(|name| {
            let connections = state
                .registry
                .group_qsizes(&name)
                .unwrap_or_default()
                .into_iter()
                .map(|(peer_addr, qsize, live)| ConnStatus {
                    peer_addr,
                    qsize,
                    live,
                })
                .collect();
            ServerGroupStatus { name, connections }
        })
        .collect();
    Json(StatusReport {
        server_groups,
        frang_blocks: state.frang.block_count(),
    })
}
