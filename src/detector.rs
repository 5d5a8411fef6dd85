use crate::{
    config::ModelConfig,
    detection::DetectionResult,
    model_service::ModelService,
    ort_service::OrtModelService,
};
use image::RgbImage;
use serde::Serialize;
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;
use tracing::instrument;

const TASK: &str = "object-detection";

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Model not loaded")]
    NotLoaded,
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Invalid threshold {0}: must be within [0, 1]")]
    InvalidThreshold(f32),
    #[error("Inference failed: {0}")]
    Inference(String),
}

pub type ModelLoader =
    Box<dyn Fn() -> Result<Arc<dyn ModelService>, DetectorError> + Send + Sync + 'static>;

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub model_name: String,
    pub task: &'static str,
    pub num_classes: usize,
    pub confidence_threshold: f32,
    pub available_labels: Vec<&'static str>,
}

/// Flags cars in images using a model that is loaded once and then shared
/// read-only by every request.
pub struct CarDetector {
    model: OnceLock<Arc<dyn ModelService>>,
    init_lock: Mutex<()>,
    loader: ModelLoader,
    threshold: f32,
}

impl CarDetector {
    pub fn new(loader: ModelLoader, threshold: f32) -> Self {
        Self {
            model: OnceLock::new(),
            init_lock: Mutex::new(()),
            loader,
            threshold,
        }
    }

    /// Detector backed by the ONNX checkpoint described in `config`.
    /// Nothing is loaded until [`CarDetector::initialize`] runs.
    pub fn from_config(config: &ModelConfig) -> Self {
        let config = config.clone();
        let threshold = config.confidence_threshold;
        let loader: ModelLoader = Box::new(move || {
            let service = OrtModelService::new(&config)?;
            Ok(Arc::new(service) as Arc<dyn ModelService>)
        });
        Self::new(loader, threshold)
    }

    /// Wraps an already loaded model.
    pub fn with_model(model: Arc<dyn ModelService>, threshold: f32) -> Self {
        let loader: ModelLoader =
            Box::new(|| Err(DetectorError::ModelLoad("no loader configured".into())));
        let detector = Self::new(loader, threshold);
        let _ = detector.model.set(model);
        detector
    }

    /// Loads the model. Once it has loaded, later calls do nothing.
    pub fn initialize(&self) -> Result<(), DetectorError> {
        if self.model.get().is_some() {
            return Ok(());
        }

        let _guard = self
            .init_lock
            .lock()
            .map_err(|e| DetectorError::ModelLoad(format!("init lock poisoned: {}", e)))?;
        if self.model.get().is_some() {
            return Ok(());
        }

        let model = (self.loader)()?;
        tracing::info!("Model {} loaded", model.name());
        let _ = self.model.set(model);
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    fn model(&self) -> Result<&Arc<dyn ModelService>, DetectorError> {
        self.model
            .get()
            .ok_or(DetectorError::NotLoaded)
    }

    pub fn model_name(&self) -> Result<&str, DetectorError> {
        Ok(self.model()?.name())
    }

    pub fn model_info(&self) -> Result<ModelInfo, DetectorError> {
        let model = self.model()?;
        let labels = model.labels();

        Ok(ModelInfo {
            model_name: model.name().to_string(),
            task: TASK,
            num_classes: labels.len(),
            confidence_threshold: self.threshold,
            available_labels: labels.iter().copied().filter(|l| *l != "N/A").collect(),
        })
    }

    /// Detects cars in encoded image bytes, keeping detections scoring at
    /// least `threshold` (the configured default when `None`).
    ///
    /// Decoding and inference run on the blocking thread pool.
    #[instrument(skip(self, image_data))]
    pub async fn detect_cars<B>(
        &self,
        image_data: B,
        threshold: Option<f32>,
    ) -> Result<DetectionResult, DetectorError>
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        let threshold = validate_threshold(threshold.unwrap_or(self.threshold))?;
        let model = self.model()?.clone();

        let result = tokio::task::spawn_blocking(move || {
            let image = decode_image(image_data.as_ref())?;
            let predictions = model.predict(&image)?;
            tracing::debug!(
                "Model returned {} predictions for a {}x{} image",
                predictions.len(),
                image.width(),
                image.height()
            );
            Ok::<_, DetectorError>(DetectionResult::from_predictions(
                &predictions,
                model.labels(),
                threshold,
            ))
        })
        .await
        .map_err(|e| DetectorError::Inference(format!("inference task failed: {}", e)))??;

        tracing::info!("Detected {} cars", result.count);
        Ok(result)
    }
}

fn validate_threshold(threshold: f32) -> Result<f32, DetectorError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(DetectorError::InvalidThreshold(threshold))
    }
}

pub fn decode_image(image_data: &[u8]) -> Result<RgbImage, DetectorError> {
    if image_data.is_empty() {
        return Err(DetectorError::InvalidImage("empty image data".into()));
    }

    let image = image::ImageReader::new(std::io::Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| DetectorError::InvalidImage(format!("Error reading image: {}", e)))?
        .decode()
        .map_err(|e| DetectorError::InvalidImage(format!("Error decoding image: {}", e)))?;

    if image.width() == 0 || image.height() == 0 {
        return Err(DetectorError::InvalidImage("image has no pixels".into()));
    }

    Ok(image.to_rgb8())
}
