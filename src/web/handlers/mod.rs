use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::state::{AppState, BridgeInfo};

#[derive(Serialize)]
pub struct HealthResponse {
    pub success: bool,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Device, stream cache and agent status
pub async fn bridge_info(State(state): State<Arc<AppState>>) -> Json<BridgeInfo> {
    Json(state.info())
}
