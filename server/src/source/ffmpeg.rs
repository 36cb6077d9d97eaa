use std::collections::VecDeque;
use std::ffi::OsStr;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use chrono::Utc;
use fire_watch_common::config::CameraConfig;
use fire_watch_common::frame::Frame;
use tracing::{debug, info, warn};

use super::{FrameSource, SourceError};

/// Lines of ffmpeg stderr kept for open-failure reports.
const STDERR_TAIL_LINES: usize = 20;
const STDERR_LINE_MAX: usize = 512;

type StderrTail = Arc<Mutex<VecDeque<String>>>;

/// Camera capture through an `ffmpeg` subprocess emitting `rgb24` raw video
/// on stdout. Frames are scaled to the configured size by ffmpeg.
///
/// stderr is drained on its own thread for the life of the process, so a
/// chatty ffmpeg never blocks on a full pipe.
pub struct FfmpegCamera {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr_thread: Option<JoinHandle<()>>,
    stderr_tail: StderrTail,
    input: String,
    width: u32,
    height: u32,
    seq: u64,
    /// First frame, read during `open` to prove the device works.
    pending: Option<Frame>,
}

impl FfmpegCamera {
    /// Spawn ffmpeg and wait for the first frame. A device that cannot
    /// deliver one is reported as an open failure.
    pub fn open(config: &CameraConfig) -> Result<Self, SourceError> {
        Self::open_with("ffmpeg", config)
    }

    fn open_with(program: impl AsRef<OsStr>, config: &CameraConfig) -> Result<Self, SourceError> {
        let (input, is_device) = match &config.input {
            Some(input) => (input.clone(), input.starts_with("/dev/video")),
            None => (format!("/dev/video{}", config.device_index), true),
        };

        let mut cmd = Command::new(program);
        cmd.args(["-hide_banner", "-loglevel", "error"]);
        if is_device {
            cmd.args([
                "-f",
                "video4linux2",
                "-framerate",
                &config.fps.to_string(),
                "-video_size",
                &format!("{}x{}", config.width, config.height),
            ]);
        }
        cmd.args([
            "-i",
            &input,
            "-vf",
            &format!("scale={}:{}", config.width, config.height),
            "-pix_fmt",
            "rgb24",
            "-f",
            "rawvideo",
            "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| SourceError::Open {
            input: input.clone(),
            reason: format!("failed to spawn ffmpeg: {e}"),
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut camera = Self {
            child: Some(child),
            stdout,
            stderr_thread: None,
            stderr_tail: StderrTail::default(),
            input,
            width: config.width,
            height: config.height,
            seq: 0,
            pending: None,
        };
        if camera.stdout.is_none() {
            return Err(camera.open_error("could not get ffmpeg stdout handle".into()));
        }
        if let Some(pipe) = stderr {
            match drain_stderr(pipe, camera.input.clone(), camera.stderr_tail.clone()) {
                Ok(handle) => camera.stderr_thread = Some(handle),
                Err(e) => return Err(camera.open_error(format!("failed to watch ffmpeg stderr: {e}"))),
            }
        }

        match camera.read_raw() {
            Ok(Some(frame)) => {
                info!(
                    input = camera.input,
                    width = camera.width,
                    height = camera.height,
                    "camera opened"
                );
                camera.pending = Some(frame);
                Ok(camera)
            }
            Ok(None) => {
                let reason = camera.collect_stderr();
                Err(camera.open_error(reason))
            }
            Err(e) => Err(camera.open_error(e.to_string())),
        }
    }

    fn open_error(&mut self, reason: String) -> SourceError {
        self.release();
        SourceError::Open {
            input: self.input.clone(),
            reason,
        }
    }

    fn read_raw(&mut self) -> Result<Option<Frame>, SourceError> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let frame_bytes = (self.width as usize) * (self.height as usize) * 3;
        let mut buffer = vec![0u8; frame_bytes];
        match stdout.read_exact(&mut buffer) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                debug!(input = self.input, seq = self.seq, "ffmpeg stream ended");
                return Ok(None);
            }
            Err(e) => return Err(SourceError::Read(e.to_string())),
        }

        let frame = Frame::from_rgb(
            self.width,
            self.height,
            buffer,
            Utc::now().timestamp_millis(),
            self.seq,
        )
        .map_err(|e| SourceError::Read(e.to_string()))?;
        self.seq += 1;
        Ok(Some(frame))
    }

    /// Wait for the exited ffmpeg and return the tail of its stderr.
    fn collect_stderr(&mut self) -> String {
        let Some(child) = self.child.as_mut() else {
            return "ffmpeg not running".into();
        };
        let status = child.wait();
        if let Some(handle) = self.stderr_thread.take() {
            // The pipe closes once ffmpeg has exited.
            let _ = handle.join();
        }
        let stderr = self
            .stderr_tail
            .lock()
            .map(|tail| tail.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default();
        match status {
            Ok(status) if stderr.is_empty() => {
                format!("ffmpeg exited with {status} before the first frame")
            }
            _ => stderr,
        }
    }
}

/// Forward ffmpeg stderr to the log and keep its last lines.
fn drain_stderr(
    pipe: ChildStderr,
    input: String,
    tail: StderrTail,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("ffmpeg-stderr".into())
        .spawn(move || {
            let mut reader = BufReader::new(pipe);
            let mut raw = Vec::new();
            loop {
                raw.clear();
                match reader.read_until(b'\n', &mut raw) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                let line: String = String::from_utf8_lossy(&raw)
                    .trim()
                    .chars()
                    .take(STDERR_LINE_MAX)
                    .collect();
                if line.is_empty() {
                    continue;
                }
                warn!(input, line, "ffmpeg");
                if let Ok(mut tail) = tail.lock() {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            debug!(input, "ffmpeg stderr closed");
        })
}

/// Warn early when ffmpeg is missing; camera capture cannot work without it.
pub async fn check_ffmpeg_available() {
    match tokio::process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await
    {
        Ok(out) if out.status.success() => {
            debug!("ffmpeg is available");
        }
        Ok(_) => {
            warn!("ffmpeg returned non-zero for -version; capture may fail");
        }
        Err(e) => {
            warn!(error = %e, "ffmpeg not found on PATH; camera capture will fail");
        }
    }
}

impl FrameSource for FfmpegCamera {
    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        self.read_raw()
    }

    fn release(&mut self) {
        self.stdout = None;
        self.pending = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                // Already exited is fine.
                debug!(error = %e, "ffmpeg kill");
            }
            match child.wait() {
                Ok(status) => info!(input = self.input, %status, "camera released"),
                Err(e) => warn!(input = self.input, error = %e, "failed to reap ffmpeg"),
            }
        }
    }

    fn name(&self) -> &str {
        &self.input
    }
}

impl Drop for FfmpegCamera {
    fn drop(&mut self) {
        self.release();
    }
}
