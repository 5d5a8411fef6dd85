use crate::server::SharedState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Status {
    message: String,
    status: String,
    model_loaded: bool,
}

pub async fn healthcheck(State(state): State<SharedState>) -> impl IntoResponse {
    state.metrics.record_request("/");

    if state.detector.is_loaded() {
        (
            StatusCode::OK,
            Json(Status {
                message: "Car Detection API is running".into(),
                status: "healthy".into(),
                model_loaded: true,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(Status {
                message: "Model not loaded".into(),
                status: "unhealthy".into(),
                model_loaded: false,
            }),
        )
    }
}
