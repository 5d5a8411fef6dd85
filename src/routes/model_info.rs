use crate::{
    detector::{DetectorError, ModelInfo},
    server::SharedState,
};
use axum::{extract::State, response::Json};
use tracing::instrument;

#[instrument(skip(state))]
pub async fn model_info(State(state): State<SharedState>) -> Result<Json<ModelInfo>, DetectorError> {
    state.metrics.record_request("/model-info");
    Ok(Json(state.detector.model_info()?))
}
