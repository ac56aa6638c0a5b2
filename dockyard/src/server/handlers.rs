//! Health and version handlers

use axum::{response::IntoResponse, Json};
use serde::Serialize;

use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "dockyard".to_string(),
        version: version.version,
    })
}

pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}
