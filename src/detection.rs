use crate::labels::CAR_LABEL;
use serde::Serialize;

/// Box corners in original image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn to_xyxy(self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// One model output slot after softmax, before any filtering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub class_id: usize,
    pub score: f32,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub label: &'static str,
    pub confidence: f32,
    #[serde(rename = "box", serialize_with = "serialize_xyxy")]
    pub bbox: BoundingBox,
}

fn serialize_xyxy<S>(bbox: &BoundingBox, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    bbox.to_xyxy().serialize(serializer)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionResult {
    pub has_cars: bool,
    pub count: usize,
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    /// Keeps the car predictions scoring at least `threshold`, best first.
    /// Class ids are resolved against `labels`, the model's own label table.
    pub fn from_predictions(
        predictions: &[Prediction],
        labels: &[&'static str],
        threshold: f32,
    ) -> Self {
        let mut detections: Vec<Detection> = predictions
            .iter()
            .filter(|p| p.score >= threshold)
            .filter_map(|p| match labels.get(p.class_id).copied() {
                Some(label) if label == CAR_LABEL => Some(Detection {
                    label,
                    confidence: p.score,
                    bbox: p.bbox,
                }),
                _ => None,
            })
            .collect();

        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        Self {
            has_cars: !detections.is_empty(),
            count: detections.len(),
            detections,
        }
    }
}
