//! Router assembly

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes;
use crate::state::SharedContext;

pub const DEFAULT_MAX_UPLOAD_MB: usize = 16;

pub fn router(ctx: SharedContext, max_upload_mb: usize) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/predict", post(routes::predict::predict))
        .with_state(ctx)
        .layer(DefaultBodyLimit::max(max_upload_mb * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use fundus_classifier::dataset::DEFAULT_CLASSES;
    use fundus_classifier::inference::PredictionResponse;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::state::tests::{png_bytes, tiny_context as context};

    const BOUNDARY: &str = "fundus-test-boundary";

    fn multipart_request(field: &str, content: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"eye.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/predict")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_valid_upload_returns_percentages() {
        let app = router(context(), DEFAULT_MAX_UPLOAD_MB);
        let response = app
            .oneshot(multipart_request("file", &png_bytes()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: PredictionResponse = serde_json::from_value(json_body(response).await).unwrap();
        let probabilities: &BTreeMap<String, f64> = &body.all_probabilities;
        assert_eq!(probabilities.len(), DEFAULT_CLASSES.len());

        let total: f64 = probabilities.values().sum();
        assert!((total - 100.0).abs() < 0.1, "sum was {}", total);

        let (best, best_value) = probabilities
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        assert_eq!(best, &body.predicted_class);
        assert!((body.confidence - best_value).abs() < 1e-9);
        assert!((0.0..=100.0).contains(&body.confidence));
    }

    #[tokio::test]
    async fn test_missing_file_field_then_valid_request() {
        let ctx = context();

        let response = router(ctx.clone(), DEFAULT_MAX_UPLOAD_MB)
            .oneshot(multipart_request("image", &png_bytes()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("file"));

        let response = router(ctx, DEFAULT_MAX_UPLOAD_MB)
            .oneshot(multipart_request("file", &png_bytes()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_non_multipart_body_is_bad_request() {
        let request = Request::builder()
            .method("POST")
            .uri("/predict")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = router(context(), DEFAULT_MAX_UPLOAD_MB)
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_undecodable_image_is_internal_error() {
        let response = router(context(), DEFAULT_MAX_UPLOAD_MB)
            .oneshot(multipart_request("file", b"these bytes are not a picture"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = json_body(response).await;
        assert!(body["error"].is_string());
        assert!(body["trace"].is_string());
    }

    #[tokio::test]
    async fn test_health_reports_labels() {
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = router(context(), DEFAULT_MAX_UPLOAD_MB)
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["labels"].as_array().unwrap().len(), DEFAULT_CLASSES.len());
        assert_eq!(body["input_shape"], serde_json::json!([3, 32, 32]));
    }
}
