mod app;
mod detection;
mod labels;
mod model_service;
mod ort_service;
mod postprocess;
mod preprocess;
mod routes;
mod server;
mod telemetry;

pub mod config;
pub mod detector;

pub use app::start_app;
pub use detection::{BoundingBox, Detection, DetectionResult, Prediction};
pub use detector::{CarDetector, DetectorError};
pub use model_service::ModelService;
