use crate::detection::{BoundingBox, Prediction};
use ndarray::{ArrayD, ArrayView1, Axis, Ix3};

fn softmax(logits: ArrayView1<f32>) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|v| v / sum).collect()
}

/// Turns DETR `logits` `[1, Q, C + 1]` and `pred_boxes` `[1, Q, 4]` into one
/// prediction per query.
///
/// The last logit of every query is the "no object" class; it takes part in
/// the softmax but never wins. Boxes come out of the model as normalized
/// `cx, cy, w, h` and are scaled to the original `width` x `height`.
pub fn decode_predictions(
    logits: &ArrayD<f32>,
    boxes: &ArrayD<f32>,
    width: u32,
    height: u32,
) -> Result<Vec<Prediction>, String> {
    let logits = logits
        .view()
        .into_dimensionality::<Ix3>()
        .map_err(|e| format!("unexpected logits shape {:?}: {}", logits.shape(), e))?;
    let boxes = boxes
        .view()
        .into_dimensionality::<Ix3>()
        .map_err(|e| format!("unexpected pred_boxes shape {:?}: {}", boxes.shape(), e))?;

    if logits.shape()[0] != boxes.shape()[0]
        || logits.shape()[1] != boxes.shape()[1]
        || boxes.shape()[2] != 4
    {
        return Err(format!(
            "logits {:?} and pred_boxes {:?} do not line up",
            logits.shape(),
            boxes.shape()
        ));
    }
    if logits.shape()[0] == 0 || logits.shape()[2] < 2 {
        return Ok(Vec::new());
    }

    let (w, h) = (width as f32, height as f32);
    let logits = logits.index_axis(Axis(0), 0);
    let boxes = boxes.index_axis(Axis(0), 0);

    let predictions = logits
        .axis_iter(Axis(0))
        .zip(boxes.axis_iter(Axis(0)))
        .filter_map(|(query_logits, query_box)| {
            let probs = softmax(query_logits);
            let (class_id, score) = probs[..probs.len() - 1]
                .iter()
                .copied()
                .enumerate()
                .reduce(|best, item| if item.1 > best.1 { item } else { best })?;

            let (cx, cy, bw, bh) = (query_box[0], query_box[1], query_box[2], query_box[3]);
            Some(Prediction {
                class_id,
                score,
                bbox: BoundingBox {
                    x1: (cx - bw / 2.) * w,
                    y1: (cy - bh / 2.) * h,
                    x2: (cx + bw / 2.) * w,
                    y2: (cy + bh / 2.) * h,
                },
            })
        })
        .collect();

    Ok(predictions)
}
