//! HTTP route handlers

pub mod health;
pub mod predict;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// Errors a handler can answer with
#[derive(Debug)]
pub enum ApiError {
    /// The request itself is unusable
    BadRequest { status: StatusCode, message: String },
    /// Decoding or inference failed
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest { status, message } => {
                (status, Json(json!({ "error": message }))).into_response()
            }
            Self::Internal(err) => {
                error!("Prediction failed: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": format!("{:#}", err),
                        "trace": format!("{:?}", err),
                    })),
                )
                    .into_response()
            }
        }
    }
}
