use crate::detection::Prediction;
use crate::detector::DetectorError;
use image::RgbImage;

/// A loaded object-detection model. Implementations must be safe to call
/// from several blocking threads at once.
pub trait ModelService: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Class names indexed by class id.
    fn labels(&self) -> &[&'static str];

    /// Runs one forward pass and returns every prediction the model emits,
    /// unfiltered.
    fn predict(&self, image: &RgbImage) -> Result<Vec<Prediction>, DetectorError>;
}
