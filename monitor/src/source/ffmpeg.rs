use camwatch_common::frame::Frame;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{FrameSource, ReadMode, StreamOpener, StreamProperties};
use crate::error::CaptureError;

/// Decoded frames buffered ahead of a sequential reader.
const SEQUENTIAL_BUFFER: usize = 8;

/// Opens streams by probing them with `ffprobe` and decoding them with an
/// `ffmpeg` child process writing raw RGB24 frames to a pipe.
#[derive(Debug, Clone)]
pub struct FfmpegOpener {
    read_timeout: Duration,
}

impl FfmpegOpener {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

enum Delivery {
    Latest(watch::Receiver<Option<Frame>>),
    Sequential(mpsc::Receiver<Frame>),
}

pub struct FfmpegSource {
    child: Child,
    reader: JoinHandle<()>,
    delivery: Delivery,
    properties: StreamProperties,
    read_timeout: Duration,
}

impl StreamOpener for FfmpegOpener {
    type Source = FfmpegSource;

    async fn open(&self, locator: &str, mode: ReadMode) -> Result<FfmpegSource, CaptureError> {
        let properties = probe(locator, self.read_timeout).await?;
        if properties.width == 0 || properties.height == 0 {
            return Err(CaptureError::Stream(
                "stream reported no video dimensions".into(),
            ));
        }

        let mut child = tool_command("ffmpeg")
            .args(decoder_args(locator))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CaptureError::Stream(format!("failed to spawn ffmpeg: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Stream("could not get ffmpeg stdout handle".into()))?;

        let (tx, delivery) = match mode {
            ReadMode::Latest => {
                let (tx, rx) = watch::channel(None);
                (FrameTx::Latest(tx), Delivery::Latest(rx))
            }
            ReadMode::Sequential => {
                let (tx, rx) = mpsc::channel(SEQUENTIAL_BUFFER);
                (FrameTx::Sequential(tx), Delivery::Sequential(rx))
            }
        };
        let reader = tokio::spawn(pump_frames(stdout, properties, tx));

        info!(
            width = properties.width,
            height = properties.height,
            fps = properties.fps,
            ?mode,
            "stream opened"
        );

        Ok(FfmpegSource {
            child,
            reader,
            delivery,
            properties,
            read_timeout: self.read_timeout,
        })
    }
}

impl FrameSource for FfmpegSource {
    fn properties(&self) -> StreamProperties {
        self.properties
    }

    async fn read_frame(&mut self) -> Option<Frame> {
        self.delivery.next(self.read_timeout).await
    }

    async fn close(mut self) {
        self.reader.abort();
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "ffmpeg decoder already exited");
        }
    }
}

impl Delivery {
    /// Next frame from the reader task. `None` on timeout or once the
    /// reader has finished and everything it produced was consumed.
    async fn next(&mut self, timeout: Duration) -> Option<Frame> {
        match self {
            Delivery::Latest(rx) => match tokio::time::timeout(timeout, rx.changed()).await {
                Ok(Ok(())) => rx.borrow_and_update().clone(),
                Ok(Err(_)) => None,
                Err(_) => {
                    debug!(?timeout, "timed out waiting for frame");
                    None
                }
            },
            Delivery::Sequential(rx) => match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(frame) => frame,
                Err(_) => {
                    debug!(?timeout, "timed out waiting for frame");
                    None
                }
            },
        }
    }
}

enum FrameTx {
    Latest(watch::Sender<Option<Frame>>),
    Sequential(mpsc::Sender<Frame>),
}

impl FrameTx {
    /// Returns `false` once the reading side has gone away.
    async fn deliver(&self, frame: Frame) -> bool {
        match self {
            FrameTx::Latest(tx) => tx.send(Some(frame)).is_ok(),
            FrameTx::Sequential(tx) => tx.send(frame).await.is_ok(),
        }
    }
}

/// Read fixed-size RGB24 frames from the decoder until EOF or until the
/// reader is dropped.
async fn pump_frames<R>(mut stdout: R, props: StreamProperties, tx: FrameTx)
where
    R: AsyncRead + Unpin,
{
    let frame_len = props.width as usize * props.height as usize * 3;
    let mut seq: u64 = 0;
    loop {
        let mut buf = vec![0u8; frame_len];
        if let Err(e) = stdout.read_exact(&mut buf).await {
            debug!(error = %e, seq, "decoder output ended");
            return;
        }
        let Some(frame) = Frame::from_rgb24(props.width, props.height, buf, seq) else {
            warn!(seq, "decoder produced a short frame");
            return;
        };
        seq += 1;
        if !tx.deliver(frame).await {
            return;
        }
    }
}

/// Command for an ffmpeg-family tool, spawned in its own process group.
///
/// A terminal Ctrl-C signals the whole foreground group. Keeping the tools
/// out of it leaves shutdown to the cancellation token, so a recording in
/// progress is not cut short.
pub fn tool_command(program: &str) -> Command {
    #[allow(unused_mut)]
    let mut std_cmd = std::process::Command::new(program);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        std_cmd.process_group(0);
    }
    let mut cmd = Command::from(std_cmd);
    cmd.kill_on_drop(true);
    cmd
}

/// Arguments for an ffmpeg process decoding `locator` to raw RGB24 on stdout.
pub fn decoder_args(locator: &str) -> Vec<String> {
    let mut args: Vec<String> = ["-nostdin", "-hide_banner", "-loglevel", "error"]
        .into_iter()
        .map(String::from)
        .collect();
    if locator.starts_with("rtsp://") || locator.starts_with("rtsps://") {
        args.extend(["-rtsp_transport", "tcp"].map(String::from));
    }
    args.extend(["-i".to_string(), locator.to_string()]);
    args.extend(["-an", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"].map(String::from));
    args
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

async fn probe(locator: &str, timeout: Duration) -> Result<StreamProperties, CaptureError> {
    let output = tool_command("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate,avg_frame_rate",
            "-of",
            "json",
            locator,
        ])
        .stdin(Stdio::null())
        .output();

    let output = tokio::time::timeout(timeout, output)
        .await
        .map_err(|_| CaptureError::Stream(format!("ffprobe timed out after {timeout:?}")))?
        .map_err(|e| CaptureError::Stream(format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CaptureError::Stream(format!(
            "ffprobe failed: {}",
            stderr.trim()
        )));
    }
    parse_probe(&output.stdout)
}

fn parse_probe(json: &[u8]) -> Result<StreamProperties, CaptureError> {
    let parsed: ProbeOutput = serde_json::from_slice(json)
        .map_err(|e| CaptureError::Stream(format!("unreadable ffprobe output: {e}")))?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| CaptureError::Stream("no video stream found".into()))?;

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .unwrap_or(0.0);

    Ok(StreamProperties {
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        fps,
    })
}

/// Parse an ffprobe rational such as `30000/1001`; `0/0` yields `None`.
fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = match rate.split_once('/') {
        Some((n, d)) => (n.trim().parse::<f64>().ok()?, d.trim().parse::<f64>().ok()?),
        None => (rate.trim().parse::<f64>().ok()?, 1.0),
    };
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some(num / den)
}
