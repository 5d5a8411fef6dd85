use crate::{
    detection::DetectionResult,
    detector::DetectorError,
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::QueryRejection,
        Multipart, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const FILE_FIELD: &str = "file";

#[derive(Error, Debug)]
pub enum DetectCarError {
    #[error("Invalid query string: {0}")]
    Query(#[from] QueryRejection),
    #[error("Invalid upload request: {0}")]
    MultipartRequest(#[from] MultipartRejection),
    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Missing `file` field in upload")]
    MissingFile,
    #[error("File must be an image, got content type `{0}`")]
    NotAnImage(String),
    #[error(transparent)]
    Detector(#[from] DetectorError),
}

impl IntoResponse for DetectCarError {
    fn into_response(self) -> Response {
        match self {
            DetectCarError::Detector(err) => err.into_response(),
            DetectCarError::Query(ref err) => {
                (err.status(), Json(super::ErrorBody::new(&self))).into_response()
            }
            DetectCarError::MultipartRequest(ref err) => {
                (err.status(), Json(super::ErrorBody::new(&self))).into_response()
            }
            DetectCarError::Multipart(ref err) => {
                (err.status(), Json(super::ErrorBody::new(&self))).into_response()
            }
            DetectCarError::MissingFile | DetectCarError::NotAnImage(_) => {
                (StatusCode::BAD_REQUEST, Json(super::ErrorBody::new(&self))).into_response()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DetectParams {
    pub threshold: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct ModelSummary {
    pub model_name: String,
    pub confidence_threshold: f32,
}

#[derive(Debug, Serialize)]
pub struct DetectCarResponse {
    pub filename: Option<String>,
    #[serde(flatten)]
    pub result: DetectionResult,
    pub box_format: &'static str,
    pub model_info: ModelSummary,
}

/// Body of `/detect-car-simple`: the car flag plus the uploaded file name,
/// without the detections.
#[derive(Debug, Serialize)]
pub struct DetectCarSimpleResponse {
    pub filename: Option<String>,
    pub has_cars: bool,
}

struct Upload {
    filename: Option<String>,
    data: Bytes,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, DetectCarError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        if let Some(content_type) = field.content_type() {
            if !content_type.starts_with("image/") {
                return Err(DetectCarError::NotAnImage(content_type.to_string()));
            }
        }

        let filename = field.file_name().map(str::to_string);
        let data = field.bytes().await?;
        tracing::debug!("Received upload {:?} ({} bytes)", filename, data.len());

        return Ok(Upload { filename, data });
    }

    Err(DetectCarError::MissingFile)
}

async fn run_detection(
    state: &SharedState,
    route: &str,
    multipart: Multipart,
    threshold: Option<f32>,
) -> Result<(Option<String>, DetectionResult), DetectCarError> {
    state.metrics.record_request(route);

    let upload = read_upload(multipart).await?;

    let start = Instant::now();
    let result = state
        .detector
        .detect_cars(upload.data, threshold)
        .await
        .inspect_err(|e| tracing::error!("Error processing image {:?}: {}", upload.filename, e))?;

    state
        .metrics
        .record_detection(start.elapsed().as_millis() as u64, result.count, route);

    Ok((upload.filename, result))
}

#[instrument(skip(state, multipart))]
pub async fn detect_car(
    State(state): State<SharedState>,
    params: Result<Query<DetectParams>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DetectCarResponse>, DetectCarError> {
    let Query(params) = params?;
    let multipart = multipart?;
    let (filename, result) =
        run_detection(&state, "/detect-car", multipart, params.threshold).await?;

    Ok(Json(DetectCarResponse {
        filename,
        result,
        box_format: "xyxy",
        model_info: ModelSummary {
            model_name: state.detector.model_name()?.to_string(),
            confidence_threshold: params.threshold.unwrap_or(state.detector.threshold()),
        },
    }))
}

#[instrument(skip(state, multipart))]
pub async fn detect_car_simple(
    State(state): State<SharedState>,
    params: Result<Query<DetectParams>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DetectCarSimpleResponse>, DetectCarError> {
    let Query(params) = params?;
    let multipart = multipart?;
    let (filename, result) =
        run_detection(&state, "/detect-car-simple", multipart, params.threshold).await?;

    Ok(Json(DetectCarSimpleResponse {
        filename,
        has_cars: result.has_cars,
    }))
}
