//! HTTP API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use super::room::RoomSummary;
use super::server::AppState;

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Relay health
#[derive(serde::Serialize)]
pub struct Health {
    pub version: &'static str,
    pub rooms: usize,
    pub uptime_seconds: u64,
}

pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Health>> {
    Json(ApiResponse::ok(Health {
        version: env!("CARGO_PKG_VERSION"),
        rooms: state.registry.room_count(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }))
}

/// List all live stream rooms
pub async fn get_rooms(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<RoomSummary>>> {
    Json(ApiResponse::ok(state.registry.summaries()))
}

/// Get one stream room
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<u32>,
) -> (StatusCode, Json<ApiResponse<RoomSummary>>) {
    match state.registry.summary(stream_id) {
        Ok(summary) => (StatusCode::OK, Json(ApiResponse::ok(summary))),
        Err(e) => (StatusCode::NOT_FOUND, Json(ApiResponse::error(e.to_string()))),
    }
}
