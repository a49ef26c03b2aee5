//! Admin HTTP surface (§6 ADDED): liveness probe plus the two operator
//! routes, both gated by `admin_auth_middleware`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Serialize;

use crate::config::GatewayConfig;

use super::ServerState;

pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Serialize)]
struct StatusResponse {
    stt: crate::types::ServiceHealth,
    tts: crate::types::ServiceHealth,
    active_sessions: usize,
    calls_today: u32,
    recent_calls: Vec<super::registry::CallRecord>,
}

pub async fn status(State(state): State<ServerState>) -> impl IntoResponse {
    let response = StatusResponse {
        stt: state.supervisor.snapshot(crate::supervisor::Service::Stt),
        tts: state.supervisor.snapshot(crate::supervisor::Service::Tts),
        active_sessions: state.registry.active_sessions(),
        calls_today: state.registry.calls_today(),
        recent_calls: state.registry.recent_calls(),
    };
    Json(response)
}

/// Re-read `GatewayConfig` from disk and swap it into shared state. Sessions
/// already in flight keep the config snapshot they were constructed with.
pub async fn reload(State(state): State<ServerState>) -> impl IntoResponse {
    match GatewayConfig::load() {
        Ok(config) => {
            *state.config.write().unwrap() = config;
            (StatusCode::OK, "config reloaded").into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "admin config reload failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "config reload failed").into_response()
        }
    }
}
