use camwatch_common::config::ClipCodec;
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::encoder::{ClipSink, SinkFactory, SinkSpec};
use crate::error::CaptureError;
use crate::keys::free_clip_path;
use crate::overlay::Overlay;
use crate::source::{FrameSource, ReadMode, StreamOpener};

/// Rate assumed when the stream does not report one.
pub const FALLBACK_FPS: u32 = 25;

/// What a finished recording produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipSummary {
    pub path: PathBuf,
    pub frames_written: u32,
    /// `fps * duration`; fewer frames means the stream ran dry.
    pub target_frames: u32,
}

/// What to record and where.
#[derive(Debug, Clone)]
pub struct ClipRequest<'a> {
    pub locator: &'a str,
    pub output_dir: &'a Path,
    pub duration_secs: u64,
    pub codec: ClipCodec,
}

/// Record a fixed-length clip from a freshly opened stream handle.
///
/// The handle and the encoder sink are released on every return path.
pub async fn record<O, F>(
    opener: &O,
    sinks: &F,
    request: &ClipRequest<'_>,
    overlay: Option<&Overlay>,
) -> Result<ClipSummary, CaptureError>
where
    O: StreamOpener,
    F: SinkFactory,
{
    tokio::fs::create_dir_all(request.output_dir)
        .await
        .map_err(|e| CaptureError::io(request.output_dir, e))?;

    let mut source = opener.open(request.locator, ReadMode::Sequential).await?;
    let result = record_from(&mut source, sinks, request, overlay).await;
    source.close().await;
    result
}

async fn record_from<S, F>(
    source: &mut S,
    sinks: &F,
    request: &ClipRequest<'_>,
    overlay: Option<&Overlay>,
) -> Result<ClipSummary, CaptureError>
where
    S: FrameSource,
    F: SinkFactory,
{
    let props = source.properties();
    let fps = clip_fps(props.fps);
    let target_frames = u64::from(fps)
        .saturating_mul(request.duration_secs)
        .min(u64::from(u32::MAX)) as u32;
    let spec = SinkSpec {
        codec: request.codec,
        fps,
        width: props.width,
        height: props.height,
    };

    let path = free_clip_path(request.output_dir, &Local::now(), request.codec.extension());
    let mut sink = sinks.open_sink(&path, spec).await?;

    info!(
        path = %path.display(),
        fps,
        width = spec.width,
        height = spec.height,
        target_frames,
        "recording clip"
    );

    let written = match write_frames(source, &mut sink, &spec, target_frames, overlay).await {
        Ok(n) => n,
        Err(e) => {
            if let Err(close_err) = sink.close().await {
                warn!(error = %close_err, "failed to close sink after write error");
            }
            return Err(e);
        }
    };
    sink.close().await?;

    if written < target_frames {
        info!(
            written,
            target_frames,
            path = %path.display(),
            "stream stopped early, clip truncated"
        );
    } else {
        info!(written, path = %path.display(), "clip saved");
    }

    Ok(ClipSummary {
        path,
        frames_written: written,
        target_frames,
    })
}

async fn write_frames<S, K>(
    source: &mut S,
    sink: &mut K,
    spec: &SinkSpec,
    target_frames: u32,
    overlay: Option<&Overlay>,
) -> Result<u32, CaptureError>
where
    S: FrameSource,
    K: ClipSink,
{
    let mut written = 0;
    while written < target_frames {
        let Some(mut frame) = source.read_frame().await else {
            break;
        };
        if frame.dimensions() != (spec.width, spec.height) {
            warn!(
                got = ?frame.dimensions(),
                expected = ?(spec.width, spec.height),
                "stream changed resolution mid-clip, stopping"
            );
            break;
        }
        if let Some(overlay) = overlay {
            overlay.apply(&mut frame);
        }
        sink.write_frame(&frame).await?;
        written += 1;
    }
    Ok(written)
}

/// Integer clip rate for a reported stream rate.
fn clip_fps(reported: f64) -> u32 {
    if reported.is_finite() && reported >= 1.0 {
        reported.round() as u32
    } else {
        warn!(reported, fallback = FALLBACK_FPS, "stream reported no usable frame rate");
        FALLBACK_FPS
    }
}
