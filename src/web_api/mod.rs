//! WebAPI - Push Channel and Query Routes
//!
//! ## Responsibilities
//!
//! - WebSocket push channel (stream / detect commands in, hub events out)
//! - Read routes over cameras, risk state and persisted notifications
//! - Calibration, credential and refresh commands

mod routes;
mod ws;

pub use routes::create_router;
pub use ws::ClientCommand;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let detector = state.orchestrator.status().await;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "detection_state": detector.state,
        "cameras": state.sessions.reachable_cameras().await.len(),
        "connections": state.realtime.connection_count(),
    }))
}
