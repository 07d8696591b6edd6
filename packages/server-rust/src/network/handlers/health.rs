//! Health, liveness, and readiness endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::{ChannelState, HealthState};

/// Detailed health as JSON.
///
/// Always 200; the `state` field says whether the server is ready, so a
/// draining server is distinguishable from one that is down.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let channel_states: serde_json::Map<String, serde_json::Value> =
        [ChannelState::Connecting, ChannelState::Open, ChannelState::Closing]
            .into_iter()
            .map(|s| (s.as_str().to_string(), state.channels.count_in_state(s).into()))
            .collect();

    Json(json!({
        "state": state.shutdown.health_state().as_str(),
        "broker_running": state.broker.is_running(),
        "channels": state.channels.count(),
        "channel_states": channel_states,
        "subscriptions": state.broker.registry().len(),
        "in_flight": state.shutdown.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Liveness check: 200 while the process answers at all.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness check: 200 only in `Ready` with the broker running, 503 otherwise.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready && state.broker.is_running() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
