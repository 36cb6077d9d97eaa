use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fire_watch_common::frame::Frame;
use tracing::{debug, info};

use super::{FrameSource, SourceError};

/// Replays the still images of a directory in file-name order, then ends.
pub struct ReplaySource {
    name: String,
    remaining: VecDeque<PathBuf>,
    seq: u64,
}

impl ReplaySource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SourceError> {
        let dir = dir.as_ref();
        let name = dir.display().to_string();
        let entries = std::fs::read_dir(dir).map_err(|e| SourceError::Open {
            input: name.clone(),
            reason: e.to_string(),
        })?;

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                matches!(
                    path.extension()
                        .and_then(|e| e.to_str())
                        .map(|e| e.to_ascii_lowercase())
                        .as_deref(),
                    Some("jpg" | "jpeg" | "png")
                )
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(SourceError::Open {
                input: name,
                reason: "no .jpg/.jpeg/.png files found".into(),
            });
        }

        info!(dir = name, frames = files.len(), "replay source opened");
        Ok(Self {
            name,
            remaining: files.into(),
            seq: 0,
        })
    }
}

impl FrameSource for ReplaySource {
    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let Some(path) = self.remaining.pop_front() else {
            debug!(dir = self.name, "replay exhausted");
            return Ok(None);
        };

        let image = image::open(&path)
            .map_err(|e| SourceError::Read(format!("{}: {e}", path.display())))?
            .to_rgb8();
        let frame = Frame::new(image, Utc::now().timestamp_millis(), self.seq);
        self.seq += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        self.remaining.clear();
    }

    fn name(&self) -> &str {
        &self.name
    }
}
