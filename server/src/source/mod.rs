//! Frame sources feeding the stream pipeline.
//!
//! A source is opened once, read one frame at a time (blocking), and
//! released when the pipeline closes. `read_frame` returning `Ok(None)`
//! means end-of-stream.

mod ffmpeg;
mod replay;

pub use ffmpeg::{check_ffmpeg_available, FfmpegCamera};
pub use replay::ReplaySource;

use fire_watch_common::config::CameraConfig;
use fire_watch_common::frame::Frame;

pub trait FrameSource: Send {
    /// Block until the next frame is available. `Ok(None)` at end-of-stream.
    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Release the underlying device. Must be safe to call more than once.
    fn release(&mut self);

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Open the source described by the camera config: a replay directory if
/// one is set, otherwise ffmpeg on `input` or `/dev/video<device_index>`.
pub fn open_source(config: &CameraConfig) -> Result<Box<dyn FrameSource>, SourceError> {
    match &config.replay_dir {
        Some(dir) => Ok(Box::new(ReplaySource::open(dir)?)),
        None => Ok(Box::new(FfmpegCamera::open(config)?)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to open video source {input}: {reason}")]
    Open { input: String, reason: String },
    #[error("failed to read frame: {0}")]
    Read(String),
}
