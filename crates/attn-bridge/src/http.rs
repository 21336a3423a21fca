//! `/health` HTTP endpoint. Grounded on `at-daemon::daemon`'s
//! `start_embedded`/axum-router-construction pattern: a small `State`
//! struct holding `Arc` handles to the daemon's collaborators, wired
//! into a one-route router alongside the `/ws` upgrade.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::protocol::{HealthResponse, PROTOCOL_VERSION};
use crate::Hub;

#[derive(Clone)]
pub struct HealthState {
    pub store: Arc<attn_core::Store>,
    pub core: Arc<attn_session::SessionCore>,
    pub hub: Arc<Hub>,
    pub instance_id: String,
    pub github_available: bool,
}

pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    let sessions = state.core.list().await.map(|s| s.len()).unwrap_or(0);
    let prs = state.store.list_prs().await.map(|p| p.len()).unwrap_or(0);
    Json(HealthResponse {
        status: "ok",
        protocol: PROTOCOL_VERSION,
        daemon_instance_id: state.instance_id,
        sessions,
        prs,
        ws_clients: state.hub.client_count(),
        github_available: state.github_available,
    })
}
