mod detect_car;
mod health;
mod metrics;
mod model_info;

use crate::{detector::DetectorError, server::SharedState};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(health::healthcheck))
        .route("/model-info", get(model_info::model_info))
        .route("/detect-car", post(detect_car::detect_car))
        .route("/detect-car-simple", post(detect_car::detect_car_simple))
        .route("/metrics", get(metrics::metrics_handler))
}

#[derive(Serialize)]
pub struct ErrorBody {
    error: String,
}

impl ErrorBody {
    pub fn new(err: &impl std::fmt::Display) -> Self {
        Self {
            error: err.to_string(),
        }
    }
}

impl IntoResponse for DetectorError {
    fn into_response(self) -> Response {
        let status = match self {
            DetectorError::InvalidImage(_) | DetectorError::InvalidThreshold(_) => {
                StatusCode::BAD_REQUEST
            }
            DetectorError::NotLoaded
            | DetectorError::ModelLoad(_)
            | DetectorError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody::new(&self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        detector::{
            tests::{encode_image, FailingModelService, MockModelService},
            CarDetector, DetectorError, ModelLoader,
        },
        server::{router, SharedState},
        telemetry::Metrics,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        Router,
    };
    use image::ImageFormat;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "car-detection-test-boundary";

    fn app_with(detector: CarDetector) -> Router {
        let state = SharedState {
            detector: Arc::new(detector),
            metrics: Arc::new(Metrics::new().unwrap()),
        };
        router(state, 1024 * 1024)
    }

    fn app() -> Router {
        app_with(CarDetector::with_model(Arc::new(MockModelService), 0.9))
    }

    fn unloaded_app() -> Router {
        let loader: ModelLoader =
            Box::new(|| Err(DetectorError::ModelLoad("checkpoint unavailable".into())));
        let detector = CarDetector::new(loader, 0.9);
        let _ = detector.initialize();
        app_with(detector)
    }

    fn multipart_body(field: &str, filename: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(uri: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn image_upload(uri: &str, color: [u8; 3]) -> Request<Body> {
        let data = encode_image(color, ImageFormat::Png);
        upload_request(uri, multipart_body("file", "test.png", "image/png", &data))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_root_endpoint() {
        let (status, body) = send(app(), get("/")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Car Detection API is running");
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model_loaded"], true);
    }

    #[tokio::test]
    async fn test_root_endpoint_without_model() {
        let (status, body) = send(unloaded_app(), get("/")).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["model_loaded"], false);
    }

    #[tokio::test]
    async fn test_model_info_endpoint() {
        let (status, body) = send(app(), get("/model-info")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["model_name"], "mock-detr");
        assert_eq!(body["task"], "object-detection");
        assert_eq!(body["num_classes"], 91);
        let threshold = body["confidence_threshold"].as_f64().unwrap();
        assert!((threshold - 0.9).abs() < 1e-6);
        let labels = body["available_labels"].as_array().unwrap();
        assert!(labels.contains(&Value::from("car")));
    }

    #[tokio::test]
    async fn test_model_info_without_model() {
        let (status, body) = send(unloaded_app(), get("/model-info")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("Model not loaded"));
    }

    #[tokio::test]
    async fn test_detect_car_endpoint_success() {
        let (status, body) = send(app(), image_upload("/detect-car", [255, 0, 0])).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["filename"], "test.png");
        assert_eq!(body["has_cars"], true);
        assert_eq!(body["count"], 1);
        assert_eq!(body["box_format"], "xyxy");
        assert_eq!(body["model_info"]["model_name"], "mock-detr");

        let detections = body["detections"].as_array().unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0]["label"], "car");
        assert!(detections[0]["confidence"].as_f64().unwrap() >= 0.9);
        assert_eq!(
            detections[0]["box"],
            serde_json::json!([10.0, 20.0, 100.0, 150.0])
        );
    }

    #[tokio::test]
    async fn test_detect_car_endpoint_no_cars() {
        let (status, body) = send(app(), image_upload("/detect-car", [255, 255, 255])).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["has_cars"], false);
        assert_eq!(body["count"], 0);
        assert_eq!(body["detections"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_detect_car_threshold_override() {
        let (status, body) = send(
            app(),
            image_upload("/detect-car?threshold=0.4", [255, 0, 0]),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        let threshold = body["model_info"]["confidence_threshold"].as_f64().unwrap();
        assert!((threshold - 0.4).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_detect_car_invalid_threshold() {
        let (status, body) = send(
            app(),
            image_upload("/detect-car?threshold=2.0", [255, 0, 0]),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("threshold"));
    }

    #[tokio::test]
    async fn test_detect_car_simple_endpoint() {
        let (status, body) = send(app(), image_upload("/detect-car-simple", [255, 0, 0])).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["has_cars"], true);
        assert_eq!(body["filename"], "test.png");
        assert!(body.get("detections").is_none());
        assert!(body.get("count").is_none());
    }

    #[tokio::test]
    async fn test_invalid_file_type() {
        let body = multipart_body("file", "test.txt", "text/plain", b"This is not an image");
        let (status, body) = send(app(), upload_request("/detect-car", body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("File must be an image"));
        assert!(body.get("detections").is_none());
    }

    #[tokio::test]
    async fn test_unparsable_threshold_is_json_error() {
        let (status, body) = send(
            app(),
            image_upload("/detect-car?threshold=abc", [255, 0, 0]),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("threshold"));
    }

    #[tokio::test]
    async fn test_non_multipart_body_is_json_error() {
        let request = Request::builder()
            .method("POST")
            .uri("/detect-car-simple")
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::from(encode_image([255, 0, 0], ImageFormat::Png)))
            .unwrap();
        let (status, body) = send(app(), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("multipart"));
    }

    #[tokio::test]
    async fn test_undecodable_image() {
        let body = multipart_body("file", "test.jpg", "image/jpeg", b"This is not an image");
        let (status, body) = send(app(), upload_request("/detect-car", body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Invalid image"));
    }

    #[tokio::test]
    async fn test_missing_file_field() {
        let data = encode_image([255, 0, 0], ImageFormat::Png);
        let body = multipart_body("picture", "test.png", "image/png", &data);
        let (status, body) = send(app(), upload_request("/detect-car-simple", body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("file"));
    }

    #[tokio::test]
    async fn test_detection_error_handling() {
        let app = app_with(CarDetector::with_model(Arc::new(FailingModelService), 0.9));
        let (status, body) = send(app, image_upload("/detect-car", [255, 0, 0])).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("Inference failed"));
    }

    #[tokio::test]
    async fn test_model_not_loaded() {
        let (status, body) = send(unloaded_app(), image_upload("/detect-car", [255, 0, 0])).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("Model not loaded"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = app();
        let _ = send(app.clone(), get("/")).await;

        let response = app.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("requests_total"));
    }
}
