//! Frame acquisition from a live stream.
//!
//! A [`StreamOpener`] turns a stream locator into a [`FrameSource`] handle.
//! Handles are scoped to the operation that opened them and must be closed
//! by it; the ffmpeg implementation also kills its child process on drop.

pub mod ffmpeg;

use camwatch_common::frame::Frame;
use tracing::debug;

use crate::error::CaptureError;

/// Consecutive reads tried after opening a stream before giving up on a
/// frame. Some cameras emit undecodable data until the first keyframe.
pub const WARMUP_READ_ATTEMPTS: u32 = 10;

/// Properties the stream reports at the time it is opened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamProperties {
    pub width: u32,
    pub height: u32,
    /// Frames per second; `0.0` when the stream does not report a rate.
    pub fps: f64,
}

/// How a handle delivers decoded frames to its reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Only the most recent frame is kept; reads after a pause see the live scene.
    Latest,
    /// Every decoded frame is delivered in order.
    Sequential,
}

pub trait FrameSource {
    fn properties(&self) -> StreamProperties;

    /// Next decoded frame, or `None` when the stream stopped yielding frames.
    async fn read_frame(&mut self) -> Option<Frame>;

    /// Release the underlying stream.
    async fn close(self);
}

pub trait StreamOpener {
    type Source: FrameSource;

    async fn open(&self, locator: &str, mode: ReadMode) -> Result<Self::Source, CaptureError>;
}

/// Read until a non-empty frame arrives, trying at most `attempts` times.
pub async fn read_with_warmup<S: FrameSource>(
    source: &mut S,
    attempts: u32,
) -> Result<Frame, CaptureError> {
    for attempt in 1..=attempts {
        match source.read_frame().await {
            Some(frame) if !frame.is_empty() => return Ok(frame),
            Some(_) => debug!(attempt, "empty frame during warm-up"),
            None => debug!(attempt, "no frame during warm-up"),
        }
    }
    Err(CaptureError::DecodeFailure { attempts })
}

/// Locator safe for logs: embedded credentials are masked.
pub fn redact_locator(locator: &str) -> String {
    let Some((scheme, rest)) = locator.split_once("://") else {
        return locator.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{scheme}://***@{}", &rest[at + 1..]),
        None => locator.to_string(),
    }
}
