//! Per-frame capture → inference → annotation → encoding → notification →
//! multipart framing.
//!
//! The pipeline is synchronous: one `tick` runs one frame through every
//! stage and returns the chunk to emit. It is driven from a blocking thread
//! by the HTTP layer, one tick per chunk the client pulls.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::Local;
use fire_watch_common::frame::{Detection, FrameError};
use tracing::{debug, info, warn};

use crate::annotate::annotate;
use crate::detector::{DetectError, Detector};
use crate::gate::{Clock, NotificationGate};
use crate::notify::{Notification, NotificationSink};
use crate::policy::SelectionPolicy;
use crate::source::{FrameSource, SourceError};

/// Multipart boundary used by the live stream.
pub const BOUNDARY: &str = "frame";
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub confidence_threshold: f32,
    pub jpeg_quality: u8,
    pub policy: SelectionPolicy,
}

pub struct StreamPipeline {
    source: Option<Box<dyn FrameSource>>,
    detector: Box<dyn Detector>,
    sink: Arc<dyn NotificationSink>,
    gate: NotificationGate,
    clock: Box<dyn Clock>,
    settings: PipelineSettings,
    state: PipelineState,
    frames: u64,
}

impl StreamPipeline {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
        sink: Arc<dyn NotificationSink>,
        gate: NotificationGate,
        clock: Box<dyn Clock>,
        settings: PipelineSettings,
    ) -> Self {
        info!(
            source = source.name(),
            detector = detector.name(),
            policy = ?settings.policy,
            confidence_threshold = settings.confidence_threshold,
            cooldown_secs = gate.cooldown().as_secs_f64(),
            "pipeline ready"
        );
        Self {
            source: Some(source),
            detector,
            sink,
            gate,
            clock,
            settings,
            state: PipelineState::Open,
            frames: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Run one frame through the pipeline.
    ///
    /// `Ok(Some(chunk))` is the next multipart chunk. `Ok(None)` means the
    /// pipeline is closed. On `Err` the pipeline has already closed and
    /// released its source.
    pub fn tick(&mut self) -> Result<Option<Bytes>, PipelineError> {
        if self.state == PipelineState::Closed {
            return Ok(None);
        }
        match self.run_tick() {
            Ok(Some(chunk)) => Ok(Some(chunk)),
            Ok(None) => {
                info!(frames = self.frames, "end of stream");
                self.close();
                Ok(None)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    fn run_tick(&mut self) -> Result<Option<Bytes>, PipelineError> {
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };
        let Some(frame) = source.read_frame()? else {
            return Ok(None);
        };

        let detections = self
            .detector
            .detect(&frame, self.settings.confidence_threshold)?;
        let seq = frame.seq;
        let annotated = annotate(frame, &detections);
        let jpeg = Bytes::from(annotated.encode_jpeg(self.settings.jpeg_quality)?);

        self.frames += 1;
        debug!(seq, detections = detections.len(), bytes = jpeg.len(), "frame processed");
        if self.frames % 100 == 0 {
            debug!(total = self.frames, "frames streamed");
        }

        if !detections.is_empty() {
            self.maybe_notify(&detections, &jpeg);
        }

        Ok(Some(multipart_chunk(&jpeg)))
    }

    fn maybe_notify(&mut self, detections: &[Detection], jpeg: &Bytes) {
        let Some(selected) = self.settings.policy.select(detections) else {
            return;
        };
        let now = self.clock.now();
        if !self.gate.should_notify(now) {
            debug!(label = selected.label, "cooldown active, notification skipped");
            return;
        }

        // The window is consumed even when delivery fails.
        self.gate.mark_sent(now);

        let notification = Notification::new(selected, jpeg.clone(), Local::now());
        info!(
            label = notification.label,
            confidence = notification.confidence,
            "sending notification"
        );
        match self.sink.notify(&notification) {
            Ok(reference) => debug!(reference, "notification sent"),
            Err(e) => warn!(error = %e, label = notification.label, "notification failed"),
        }
    }

    /// Release the source and stop producing chunks. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
            info!(source = source.name(), frames = self.frames, "pipeline closed");
        }
        self.state = PipelineState::Closed;
    }

    /// Resume with a freshly opened source, keeping the detector and the
    /// notification cooldown.
    pub fn reopen(&mut self, source: Box<dyn FrameSource>) {
        if let Some(mut old) = self.source.replace(source) {
            old.release();
        }
        self.state = PipelineState::Open;
        info!("pipeline reopened");
    }
}

impl Drop for StreamPipeline {
    fn drop(&mut self) {
        self.close();
    }
}

/// Frame one JPEG as a `multipart/x-mixed-replace` part.
pub fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let mut chunk = BytesMut::with_capacity(jpeg.len() + 48);
    chunk.put_slice(b"--");
    chunk.put_slice(BOUNDARY.as_bytes());
    chunk.put_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    chunk.put_slice(jpeg);
    chunk.put_slice(b"\r\n");
    chunk.freeze()
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("capture failed: {0}")]
    Source(#[from] SourceError),
    #[error("detection failed: {0}")]
    Detect(#[from] DetectError),
    #[error("frame encoding failed: {0}")]
    Encode(#[from] FrameError),
}
