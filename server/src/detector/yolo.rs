use std::path::Path;

use fire_watch_common::config::DetectorConfig;
use fire_watch_common::frame::{BoundingBox, Detection, Frame};
use image::imageops::FilterType;
use tract_onnx::prelude::*;
use tracing::{debug, info};

use super::{DetectError, Detector};

/// YOLO object detector running an ONNX export through tract.
///
/// Accepts both export layouts:
/// - end-to-end `[1, N, 6]` rows of `x1, y1, x2, y2, score, class` (YOLOv10);
/// - raw `[1, 4 + classes, N]` columns of `cx, cy, w, h, scores...`
///   (YOLOv8/11), which still need non-maximum suppression.
///
/// Frames are stretched to the square model input; boxes are scaled back
/// to frame coordinates.
pub struct YoloDetector {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    labels: Vec<String>,
    iou_threshold: f32,
    max_detections: usize,
}

impl YoloDetector {
    pub fn load(config: &DetectorConfig) -> Result<Self, DetectError> {
        let path = Path::new(&config.model_path);
        let size = config.input_size as usize;
        let load_err = |e: TractError| DetectError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(load_err)?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .map_err(load_err)?
            .into_optimized()
            .map_err(load_err)?
            .into_runnable()
            .map_err(load_err)?;

        info!(
            model = config.model_path,
            input_size = config.input_size,
            labels = ?config.labels,
            "detector model loaded"
        );

        Ok(Self {
            model,
            input_size: config.input_size,
            labels: config.labels.clone(),
            iou_threshold: config.iou_threshold,
            max_detections: config.max_detections,
        })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let size = self.input_size;
        let resized = image::imageops::resize(&frame.image, size, size, FilterType::Triangle);
        tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        )
        .into_tensor()
    }
}

impl Detector for YoloDetector {
    fn detect(
        &mut self,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, DetectError> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| DetectError::Inference(e.to_string()))?;
        let output = outputs
            .first()
            .ok_or_else(|| DetectError::Inference("model produced no outputs".into()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| DetectError::Inference(e.to_string()))?;
        let dims = view.shape().to_vec();
        let values: Vec<f32> = view.iter().copied().collect();

        let params = DecodeParams {
            confidence_threshold,
            iou_threshold: self.iou_threshold,
            max_detections: self.max_detections,
        };
        let candidates = decode(&values, &dims, &params)?;

        let detections = to_frame_detections(
            candidates,
            &self.labels,
            self.input_size,
            (frame.width(), frame.height()),
        );

        debug!(seq = frame.seq, count = detections.len(), "inference complete");
        Ok(detections)
    }

    fn name(&self) -> &'static str {
        "yolo-onnx"
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct DecodeParams {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

/// A decoded box in model input coordinates.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Candidate {
    pub class_id: usize,
    pub score: f32,
    pub bbox: BoundingBox,
}

pub(crate) fn label_for(labels: &[String], class_id: usize) -> String {
    labels
        .get(class_id)
        .cloned()
        .unwrap_or_else(|| format!("class_{class_id}"))
}

/// Map candidates from the square model input back onto a frame of
/// `(width, height)`, scaling each axis separately.
pub(crate) fn to_frame_detections(
    candidates: Vec<Candidate>,
    labels: &[String],
    input_size: u32,
    (width, height): (u32, u32),
) -> Vec<Detection> {
    let sx = width as f32 / input_size as f32;
    let sy = height as f32 / input_size as f32;
    candidates
        .into_iter()
        .map(|c| {
            Detection::new(label_for(labels, c.class_id), c.score, c.class_id)
                .with_bbox(c.bbox.scaled(sx, sy))
        })
        .collect()
}

/// Decode a row-major output tensor of shape `dims`.
pub(crate) fn decode(
    values: &[f32],
    dims: &[usize],
    params: &DecodeParams,
) -> Result<Vec<Candidate>, DetectError> {
    let [batch, d1, d2] = dims else {
        return Err(DetectError::OutputShape(dims.to_vec()));
    };
    if *batch != 1 || values.len() != d1 * d2 {
        return Err(DetectError::OutputShape(dims.to_vec()));
    }

    if *d2 == 6 {
        Ok(decode_end_to_end(values, *d1, params))
    } else if *d1 >= 5 {
        Ok(decode_raw(values, *d1, *d2, params))
    } else {
        Err(DetectError::OutputShape(dims.to_vec()))
    }
}

fn decode_end_to_end(values: &[f32], rows: usize, params: &DecodeParams) -> Vec<Candidate> {
    values
        .chunks_exact(6)
        .take(rows)
        .filter(|row| row[4] >= params.confidence_threshold)
        .map(|row| Candidate {
            class_id: row[5].max(0.0) as usize,
            score: row[4],
            bbox: BoundingBox::new(row[0], row[1], row[2], row[3]),
        })
        .take(params.max_detections)
        .collect()
}

fn decode_raw(
    values: &[f32],
    channels: usize,
    anchors: usize,
    params: &DecodeParams,
) -> Vec<Candidate> {
    let at = |channel: usize, anchor: usize| values[channel * anchors + anchor];

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (4..channels)
            .map(|c| (c - 4, at(c, anchor)))
            .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score < params.confidence_threshold {
            continue;
        }
        candidates.push(Candidate {
            class_id,
            score,
            bbox: BoundingBox::from_center(
                at(0, anchor),
                at(1, anchor),
                at(2, anchor),
                at(3, anchor),
            ),
        });
    }

    non_max_suppression(candidates, params.iou_threshold, params.max_detections)
}

/// Greedy per-class NMS; output is sorted by descending score.
fn non_max_suppression(
    mut candidates: Vec<Candidate>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if keep.len() >= max_detections {
            break;
        }
        let suppressed = keep.iter().any(|kept| {
            kept.class_id == candidate.class_id && kept.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: DecodeParams = DecodeParams {
        confidence_threshold: 0.5,
        iou_threshold: 0.45,
        max_detections: 100,
    };

    #[test]
    fn end_to_end_rows_keep_model_order() {
        #[rustfmt::skip]
        let values = [
            10.0, 10.0, 50.0, 50.0, 0.62, 1.0,
            60.0, 60.0, 90.0, 90.0, 0.91, 0.0,
            0.0,  0.0,  0.0,  0.0,  0.0,  0.0,
        ];
        let out = decode(&values, &[1, 3, 6], &PARAMS).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].class_id, 1);
        assert_eq!(out[0].score, 0.62);
        assert_eq!(out[0].bbox, BoundingBox::new(10.0, 10.0, 50.0, 50.0));
        assert_eq!(out[1].class_id, 0);
    }

    #[test]
    fn end_to_end_respects_threshold_and_cap() {
        #[rustfmt::skip]
        let values = [
            0.0, 0.0, 1.0, 1.0, 0.9, 0.0,
            0.0, 0.0, 1.0, 1.0, 0.8, 0.0,
            0.0, 0.0, 1.0, 1.0, 0.4, 0.0,
        ];
        let params = DecodeParams {
            max_detections: 1,
            ..PARAMS
        };
        let out = decode(&values, &[1, 3, 6], &params).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].score, 0.9);
    }

    #[test]
    fn raw_layout_picks_best_class_and_suppresses_overlaps() {
        // channels: cx, cy, w, h, fire, smoke; 3 anchors
        #[rustfmt::skip]
        let values = [
            // cx
            50.0, 52.0, 200.0,
            // cy
            50.0, 50.0, 200.0,
            // w
            20.0, 20.0, 40.0,
            // h
            20.0, 20.0, 40.0,
            // fire
            0.7,  0.9,  0.1,
            // smoke
            0.1,  0.2,  0.8,
        ];
        let out = decode(&values, &[1, 6, 3], &PARAMS).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].class_id, 0);
        assert_eq!(out[0].score, 0.9);
        assert_eq!(out[0].bbox, BoundingBox::from_center(52.0, 50.0, 20.0, 20.0));
        assert_eq!(out[1].class_id, 1);
        assert_eq!(out[1].score, 0.8);
    }

    #[test]
    fn overlapping_boxes_of_different_classes_survive() {
        #[rustfmt::skip]
        let values = [
            50.0, 50.0,
            50.0, 50.0,
            20.0, 20.0,
            20.0, 20.0,
            0.9,  0.0,
            0.0,  0.8,
        ];
        let out = decode(&values, &[1, 6, 2], &PARAMS).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn bad_shapes_are_rejected() {
        assert!(matches!(
            decode(&[0.0; 6], &[6], &PARAMS),
            Err(DetectError::OutputShape(_))
        ));
        assert!(matches!(
            decode(&[0.0; 12], &[2, 1, 6], &PARAMS),
            Err(DetectError::OutputShape(_))
        ));
        assert!(matches!(
            decode(&[0.0; 8], &[1, 4, 2], &PARAMS),
            Err(DetectError::OutputShape(_))
        ));
        assert!(matches!(
            decode(&[0.0; 5], &[1, 1, 6], &PARAMS),
            Err(DetectError::OutputShape(_))
        ));
    }

    #[test]
    fn labels_fall_back_to_class_index() {
        let labels = vec!["fire".to_string(), "smoke".to_string()];
        assert_eq!(label_for(&labels, 0), "fire");
        assert_eq!(label_for(&labels, 1), "smoke");
        assert_eq!(label_for(&labels, 7), "class_7");
    }

    #[test]
    fn raw_layout_is_ordered_by_score_not_anchor() {
        // channels: cx, cy, w, h, fire, smoke; 2 anchors far apart
        #[rustfmt::skip]
        let values = [
            50.0,  300.0,
            50.0,  300.0,
            20.0,  20.0,
            20.0,  20.0,
            0.1,   0.95,
            0.8,   0.1,
        ];
        let out = decode(&values, &[1, 6, 2], &PARAMS).unwrap();
        let order: Vec<(usize, f32)> = out.iter().map(|c| (c.class_id, c.score)).collect();
        assert_eq!(order, vec![(0, 0.95), (1, 0.8)]);
    }

    #[test]
    fn boxes_scale_back_to_a_wide_frame() {
        let labels = vec!["fire".to_string(), "smoke".to_string()];
        let candidates = vec![
            Candidate {
                class_id: 1,
                score: 0.8,
                bbox: BoundingBox::new(64.0, 320.0, 320.0, 640.0),
            },
            Candidate {
                class_id: 7,
                score: 0.75,
                bbox: BoundingBox::new(0.0, 0.0, 640.0, 640.0),
            },
        ];
        let out = to_frame_detections(candidates, &labels, 640, (1280, 720));

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].label, "smoke");
        assert_eq!(out[0].confidence, 0.8);
        assert_eq!(out[0].bbox, Some(BoundingBox::new(128.0, 360.0, 640.0, 720.0)));
        assert_eq!(out[1].label, "class_7");
        assert_eq!(out[1].bbox, Some(BoundingBox::new(0.0, 0.0, 1280.0, 720.0)));
    }
}
