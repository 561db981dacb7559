//! Health check endpoint

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::SharedContext;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub backend: String,
    pub labels: Vec<String>,
    /// `[channels, height, width]` expected by the model
    pub input_shape: [usize; 3],
    pub model_path: Option<String>,
    pub loaded_at: DateTime<Utc>,
}

/// GET /health - Health check endpoint
pub async fn health_check(State(ctx): State<SharedContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_seconds: ctx.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: fundus_classifier::backend::backend_name().to_string(),
        labels: ctx.labels().to_vec(),
        input_shape: ctx.input_shape(),
        model_path: ctx.model_path().map(|p| p.display().to_string()),
        loaded_at: ctx.loaded_at(),
    })
}
