use crate::{
    config::ModelConfig,
    detection::Prediction,
    detector::DetectorError,
    labels::COCO_LABELS,
    model_service::ModelService,
    postprocess::decode_predictions,
    preprocess::{transform_image, PreprocessConfig},
};
use image::RgbImage;
use ndarray::{Array, ArrayD, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session, SessionOutputs},
    value::TensorRef,
};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

const LOGITS_OUTPUT: &str = "logits";
const BOXES_OUTPUT: &str = "pred_boxes";

fn extract_output(outputs: &SessionOutputs, name: &str) -> Result<ArrayD<f32>, DetectorError> {
    let value = outputs
        .get(name)
        .ok_or_else(|| DetectorError::Inference(format!("model has no `{}` output", name)))?;

    let (shape, data) = value
        .try_extract_tensor::<f32>()
        .map_err(|e| DetectorError::Inference(format!("failed to extract `{}`: {}", name, e)))?;

    ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
        .map_err(|e| DetectorError::Inference(format!("invalid `{}` shape: {}", name, e)))
}

fn build_session(model_config: &ModelConfig, path: &Path) -> Result<Session, ort::Error> {
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    if let Some(threads) = model_config.intra_threads {
        builder = builder.with_intra_threads(threads)?;
    }
    builder.commit_from_file(path)
}

fn check_outputs(session: &Session) -> Result<(), DetectorError> {
    for expected in [LOGITS_OUTPUT, BOXES_OUTPUT] {
        if !session.outputs.iter().any(|output| output.name == expected) {
            return Err(DetectorError::ModelLoad(format!(
                "checkpoint is not a DETR export: missing `{}` output",
                expected
            )));
        }
    }
    Ok(())
}

/// DETR checkpoint served from a pool of ONNX Runtime sessions.
#[derive(Clone)]
pub struct OrtModelService {
    name: String,
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    preprocess: PreprocessConfig,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, DetectorError> {
        let path = model_config.get_path();
        if !path.exists() {
            return Err(DetectorError::ModelLoad(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = build_session(model_config, &path).map_err(|e| {
                    DetectorError::ModelLoad(format!("failed to load {}: {}", path.display(), e))
                })?;
                check_outputs(&session)?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, DetectorError>>()?;

        tracing::info!(
            model = %model_config.name,
            path = %path.display(),
            "Created {} ONNX sessions",
            num_instances
        );

        Ok(Self {
            name: model_config.name.clone(),
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            preprocess: PreprocessConfig {
                shortest_edge: model_config.shortest_edge,
                longest_edge: model_config.longest_edge,
            },
        })
    }

    pub fn run_inference(
        &self,
        input: &Array<f32, Ix4>,
    ) -> Result<(ArrayD<f32>, ArrayD<f32>), DetectorError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| DetectorError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);
        let input = input.as_standard_layout();
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectorError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| DetectorError::Inference(format!("inference failed: {}", e)))?;

        let logits = extract_output(&outputs, LOGITS_OUTPUT)?;
        let boxes = extract_output(&outputs, BOXES_OUTPUT)?;

        Ok((logits, boxes))
    }
}

impl ModelService for OrtModelService {
    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> &[&'static str] {
        &COCO_LABELS
    }

    fn predict(&self, image: &RgbImage) -> Result<Vec<Prediction>, DetectorError> {
        let input = transform_image(image, &self.preprocess);
        let (logits, boxes) = self.run_inference(&input)?;

        decode_predictions(&logits, &boxes, image.width(), image.height())
            .map_err(DetectorError::Inference)
    }
}
