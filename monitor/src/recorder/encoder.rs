use camwatch_common::config::ClipCodec;
use camwatch_common::frame::Frame;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, error, info, warn};

use crate::error::CaptureError;
use crate::source::ffmpeg::tool_command;

/// Parameters an encoder sink is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkSpec {
    pub codec: ClipCodec,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

pub trait ClipSink {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), CaptureError>;

    /// Flush and finalize the file. Returns the number of frames written.
    async fn close(self) -> Result<u32, CaptureError>;
}

pub trait SinkFactory {
    type Sink: ClipSink;

    async fn open_sink(&self, path: &Path, spec: SinkSpec) -> Result<Self::Sink, CaptureError>;
}

/// Encodes clips with an ffmpeg subprocess fed raw RGB24 frames on stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegSinkFactory;

pub struct FfmpegSink {
    child: Child,
    stdin: ChildStdin,
    path: PathBuf,
    spec: SinkSpec,
    frame_count: u32,
}

impl SinkFactory for FfmpegSinkFactory {
    type Sink = FfmpegSink;

    async fn open_sink(&self, path: &Path, spec: SinkSpec) -> Result<FfmpegSink, CaptureError> {
        if spec.fps == 0 || spec.width == 0 || spec.height == 0 {
            return Err(CaptureError::Sink {
                path: path.to_path_buf(),
                reason: format!(
                    "unusable sink parameters {}x{} @ {} fps",
                    spec.width, spec.height, spec.fps
                ),
            });
        }

        let mut child = tool_command("ffmpeg")
            .args(encoder_args(&spec))
            // never overwrite an existing artifact
            .arg("-n")
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CaptureError::io(path, e))?;

        let stdin = child.stdin.take().ok_or_else(|| CaptureError::Sink {
            path: path.to_path_buf(),
            reason: "could not get ffmpeg stdin handle".into(),
        })?;

        debug!(
            codec = ?spec.codec,
            fps = spec.fps,
            width = spec.width,
            height = spec.height,
            output = %path.display(),
            "ffmpeg encoder started"
        );

        Ok(FfmpegSink {
            child,
            stdin,
            path: path.to_path_buf(),
            spec,
            frame_count: 0,
        })
    }
}

impl ClipSink for FfmpegSink {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), CaptureError> {
        if frame.dimensions() != (self.spec.width, self.spec.height) {
            return Err(CaptureError::Sink {
                path: self.path.clone(),
                reason: format!(
                    "frame is {:?}, sink expects {}x{}",
                    frame.dimensions(),
                    self.spec.width,
                    self.spec.height
                ),
            });
        }
        self.stdin
            .write_all(frame.as_rgb24())
            .await
            .map_err(|e| CaptureError::Sink {
                path: self.path.clone(),
                reason: format!("failed to write frame to ffmpeg stdin: {e}"),
            })?;
        self.frame_count += 1;
        Ok(())
    }

    async fn close(self) -> Result<u32, CaptureError> {
        // Close stdin so ffmpeg knows there are no more frames.
        drop(self.stdin);

        let output = self
            .child
            .wait_with_output()
            .await
            .map_err(|e| CaptureError::io(&self.path, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(stderr = %stderr, path = %self.path.display(), "ffmpeg exited with error");
            return Err(CaptureError::Sink {
                path: self.path,
                reason: stderr.trim().to_string(),
            });
        }

        info!(
            frame_count = self.frame_count,
            path = %self.path.display(),
            "clip encoding complete"
        );
        Ok(self.frame_count)
    }
}

/// ffmpeg input and codec arguments for a sink; the output path follows.
pub fn encoder_args(spec: &SinkSpec) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-s".into(),
        format!("{}x{}", spec.width, spec.height),
        "-r".into(),
        spec.fps.to_string(),
        "-i".into(),
        "pipe:0".into(),
    ];
    let codec: &[&str] = match spec.codec {
        ClipCodec::Mjpeg => &["-c:v", "mjpeg", "-q:v", "5", "-pix_fmt", "yuvj420p"],
        ClipCodec::H264 => &[
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-crf",
            "28",
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "+faststart",
        ],
    };
    args.extend(codec.iter().map(|s| s.to_string()));
    args
}

/// Check whether ffmpeg and ffprobe are available on PATH. Logs a warning if not.
pub async fn check_ffmpeg_available() {
    for tool in ["ffmpeg", "ffprobe"] {
        match Command::new(tool).arg("-version").output().await {
            Ok(out) if out.status.success() => {
                debug!(tool, "available");
            }
            Ok(_) => {
                warn!(tool, "returned non-zero for -version; capture may fail");
            }
            Err(e) => {
                warn!(
                    tool,
                    error = %e,
                    "not found on PATH; streams cannot be opened or clips encoded"
                );
            }
        }
    }
}
