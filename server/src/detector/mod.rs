//! Object detection over captured frames.

mod yolo;

pub use yolo::YoloDetector;

use fire_watch_common::frame::{Detection, Frame};

pub trait Detector: Send {
    /// Run the model on one frame, returning detections at or above
    /// `confidence_threshold` in model output order.
    fn detect(
        &mut self,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, DetectError>;

    /// Backend identifier for logging.
    fn name(&self) -> &'static str {
        "unnamed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("failed to load model {path}: {reason}")]
    Load { path: String, reason: String },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unexpected model output shape {0:?}")]
    OutputShape(Vec<usize>),
}
