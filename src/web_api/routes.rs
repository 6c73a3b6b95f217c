//! API Routes

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::ws::websocket_handler;
use crate::camera_registry::{AuthRequest, CalibrateRequest};
use crate::error::{Error, Result};
use crate::models::ApiResponse;
use crate::state::AppState;

const DEFAULT_NOTIFICATION_LIMIT: usize = 100;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Cameras
        .route("/api/cameras", get(list_cameras))
        .route("/api/cameras/refresh", post(refresh_cameras))
        .route("/api/cameras/status", get(camera_status))
        .route("/api/cameras/:id", get(get_camera))
        .route("/api/cameras/:id/calibrate", post(calibrate_camera))
        .route("/api/cameras/:id/auth", post(auth_camera))
        .route("/api/cameras/:id/snapshot", get(get_snapshot))
        .route("/api/cameras/:id/stream", get(get_stream_url))
        // Risk state
        .route("/api/violators", get(list_violators))
        .route("/api/violators/:id", get(get_violators))
        .route("/api/counts", get(list_counts))
        .route("/api/counts/:id", get(get_count))
        .route("/api/means", get(list_means))
        .route("/api/means/combined", get(combined_mean))
        .route("/api/means/:id", get(get_mean))
        .route("/api/notifications", get(list_notifications))
        // Detector
        .route("/api/detector/status", get(detector_status))
        .route("/api/detector/reinitialize", post(reinitialize_detector))
        // WebSocket
        .route("/api/ws", get(websocket_handler))
        .with_state(state)
}

// ========================================
// Camera Handlers
// ========================================

async fn list_cameras(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.sessions.snapshots().await))
}

async fn get_camera(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let snapshot = state
        .sessions
        .snapshot(&id)
        .await
        .ok_or_else(|| Error::NotFound(format!("camera {}", id)))?;
    Ok(Json(ApiResponse::success(snapshot)))
}

async fn refresh_cameras(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.sessions.refresh().await))
}

/// Reachability as last observed by the session manager
async fn camera_status(State(state): State<AppState>) -> impl IntoResponse {
    let offline = state.camera_status.get_offline_cameras().await;
    Json(ApiResponse::success(serde_json::json!({
        "cameras": state.camera_status.snapshot().await,
        "offline": offline,
    })))
}

async fn calibrate_camera(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CalibrateRequest>,
) -> Result<impl IntoResponse> {
    let snapshot = state.sessions.calibrate(&id, req).await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

async fn auth_camera(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AuthRequest>,
) -> Result<impl IntoResponse> {
    let snapshot = state.sessions.auth(&id, req).await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

/// Fresh JPEG from the device
async fn get_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let frame = state.sessions.fetch(&id).await?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], frame))
}

async fn get_stream_url(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let url = state.sessions.stream_url(&id).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "camera_id": id,
        "stream_url": url,
    }))))
}

// ========================================
// Risk Handlers
// ========================================

async fn list_violators(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.risk.all_violators().await))
}

async fn get_violators(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let violators = state
        .risk
        .violators(&id)
        .await
        .ok_or_else(|| Error::NotFound(format!("camera {}", id)))?;
    Ok(Json(ApiResponse::success(violators)))
}

async fn list_counts(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.risk.counts().await))
}

async fn get_count(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let count = state
        .risk
        .count(&id)
        .await
        .ok_or_else(|| Error::NotFound(format!("camera {}", id)))?;
    Ok(Json(ApiResponse::success(count)))
}

async fn list_means(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.risk.means().await))
}

async fn get_mean(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let mean = state
        .risk
        .mean(&id)
        .await
        .ok_or_else(|| Error::NotFound(format!("rolling mean for camera {}", id)))?;
    Ok(Json(ApiResponse::success(mean)))
}

#[derive(Debug, Deserialize)]
struct CombinedQuery {
    /// Comma separated camera ids; all cameras when absent
    ids: Option<String>,
}

async fn combined_mean(
    State(state): State<AppState>,
    Query(query): Query<CombinedQuery>,
) -> Result<impl IntoResponse> {
    let ids: Vec<String> = query
        .ids
        .as_deref()
        .map(|ids| {
            ids.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let mean = state
        .risk
        .combined_mean(&ids)
        .await
        .ok_or_else(|| Error::NotFound("no violators yet".to_string()))?;
    Ok(Json(ApiResponse::success(mean)))
}

#[derive(Debug, Deserialize)]
struct NotificationQuery {
    camera_id: Option<String>,
    limit: Option<usize>,
}

async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
) -> Result<impl IntoResponse> {
    let notifications = state
        .risk
        .notifications(
            query.camera_id.as_deref(),
            query.limit.unwrap_or(DEFAULT_NOTIFICATION_LIMIT),
        )
        .await?;
    Ok(Json(ApiResponse::success(notifications)))
}

// ========================================
// Detector Handlers
// ========================================

async fn detector_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.orchestrator.status().await))
}

async fn reinitialize_detector(State(state): State<AppState>) -> impl IntoResponse {
    let detection_state = state.orchestrator.reinitialize().await;
    Json(ApiResponse::success(serde_json::json!({
        "state": detection_state,
    })))
}
