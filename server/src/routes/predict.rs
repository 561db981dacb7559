//! Prediction endpoint

use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    Json,
};
use fundus_classifier::inference::PredictionResponse;
use tracing::info;
use uuid::Uuid;

use super::ApiError;
use crate::state::SharedContext;

/// Multipart field carrying the image
pub const FILE_FIELD: &str = "file";

/// POST /predict - Classify one uploaded fundus image
pub async fn predict(
    State(ctx): State<SharedContext>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let request_id = Uuid::new_v4();
    let mut multipart = multipart.map_err(|e| ApiError::BadRequest {
        status: e.status(),
        message: e.body_text(),
    })?;

    let bytes = read_file_field(&mut multipart).await?;
    info!(%request_id, bytes = bytes.len(), "Prediction request");

    let worker = Arc::clone(&ctx);
    let result = tokio::task::spawn_blocking(move || worker.predict(&bytes))
        .await
        .context("Inference task did not complete")??;

    info!(
        %request_id,
        class = %result.predicted_class,
        confidence = result.confidence * 100.0,
        ms = result.inference_time_ms,
        "Prediction done"
    );
    Ok(Json(result.to_response()))
}

async fn read_file_field(multipart: &mut Multipart) -> Result<Bytes, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some(FILE_FIELD) {
            return field.bytes().await.map_err(multipart_error);
        }
    }
    Err(ApiError::bad_request(format!(
        "Missing multipart field '{}' with the image to classify",
        FILE_FIELD
    )))
}

fn multipart_error(err: MultipartError) -> ApiError {
    ApiError::BadRequest {
        status: err.status(),
        message: err.body_text(),
    }
}
