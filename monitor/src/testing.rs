//! In-memory stream and encoder doubles for tests.

use camwatch_common::frame::Frame;
use image::{Rgb, RgbImage};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::CaptureError;
use crate::recorder::encoder::{ClipSink, SinkFactory, SinkSpec};
use crate::source::{FrameSource, ReadMode, StreamOpener, StreamProperties};

pub fn flat_frame(width: u32, height: u32, value: u8) -> Frame {
    Frame::new(RgbImage::from_pixel(width, height, Rgb([value; 3])), 0)
}

struct Script {
    /// Shared by every handle, like a live feed: each read consumes a frame.
    frames: VecDeque<Frame>,
    props: StreamProperties,
    fail_open: bool,
    opens: usize,
    closes: usize,
    modes: Vec<ReadMode>,
    cancel_when_exhausted: Option<CancellationToken>,
}

/// A stream whose frames are scripted up front.
#[derive(Clone)]
pub struct ScriptedOpener {
    script: Arc<Mutex<Script>>,
}

pub struct ScriptedSource {
    script: Arc<Mutex<Script>>,
    props: StreamProperties,
    next_seq: u64,
}

impl ScriptedOpener {
    pub fn new(frames: Vec<Frame>) -> Self {
        let (width, height) = frames
            .iter()
            .find(|f| !f.is_empty())
            .map(Frame::dimensions)
            .unwrap_or((0, 0));
        Self {
            script: Arc::new(Mutex::new(Script {
                frames: frames.into(),
                props: StreamProperties {
                    width,
                    height,
                    fps: 25.0,
                },
                fail_open: false,
                opens: 0,
                closes: 0,
                modes: Vec::new(),
                cancel_when_exhausted: None,
            })),
        }
    }

    pub fn with_fps(self, fps: f64) -> Self {
        self.script.lock().unwrap().props.fps = fps;
        self
    }

    pub fn failing(self) -> Self {
        self.set_failing(true);
        self
    }

    pub fn set_failing(&self, fail: bool) {
        self.script.lock().unwrap().fail_open = fail;
    }

    /// Cancel `token` the first time a read finds the script empty.
    pub fn cancel_when_exhausted(self, token: CancellationToken) -> Self {
        self.script.lock().unwrap().cancel_when_exhausted = Some(token);
        self
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().frames.len()
    }

    pub fn opens(&self) -> usize {
        self.script.lock().unwrap().opens
    }

    pub fn closes(&self) -> usize {
        self.script.lock().unwrap().closes
    }

    pub fn modes(&self) -> Vec<ReadMode> {
        self.script.lock().unwrap().modes.clone()
    }
}

impl StreamOpener for ScriptedOpener {
    type Source = ScriptedSource;

    async fn open(&self, _locator: &str, mode: ReadMode) -> Result<ScriptedSource, CaptureError> {
        let mut script = self.script.lock().unwrap();
        if script.fail_open {
            return Err(CaptureError::Stream("scripted stream refused".into()));
        }
        script.opens += 1;
        script.modes.push(mode);
        Ok(ScriptedSource {
            script: Arc::clone(&self.script),
            props: script.props,
            next_seq: 0,
        })
    }
}

impl FrameSource for ScriptedSource {
    fn properties(&self) -> StreamProperties {
        self.props
    }

    async fn read_frame(&mut self) -> Option<Frame> {
        let mut script = self.script.lock().unwrap();
        match script.frames.pop_front() {
            Some(mut frame) => {
                frame.seq = self.next_seq;
                self.next_seq += 1;
                Some(frame)
            }
            None => {
                if let Some(token) = &script.cancel_when_exhausted {
                    token.cancel();
                }
                None
            }
        }
    }

    async fn close(self) {
        self.script.lock().unwrap().closes += 1;
    }
}

#[derive(Default)]
struct SinkLog {
    opened: Vec<(PathBuf, SinkSpec)>,
    frames: Vec<Frame>,
    closed: usize,
    fail_open: bool,
    fail_after: Option<usize>,
}

/// Encoder double that keeps written frames in memory and leaves an empty
/// file at the sink path.
#[derive(Clone, Default)]
pub struct MemorySinkFactory {
    log: Arc<Mutex<SinkLog>>,
}

pub struct MemorySink {
    log: Arc<Mutex<SinkLog>>,
    path: PathBuf,
    written: u32,
}

impl MemorySinkFactory {
    pub fn failing_open(self) -> Self {
        self.log.lock().unwrap().fail_open = true;
        self
    }

    /// Fail every write after the first `n` frames across all sinks.
    pub fn failing_after(self, n: usize) -> Self {
        self.log.lock().unwrap().fail_after = Some(n);
        self
    }

    pub fn opened(&self) -> Vec<(PathBuf, SinkSpec)> {
        self.log.lock().unwrap().opened.clone()
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.log.lock().unwrap().frames.clone()
    }

    pub fn frames_written(&self) -> usize {
        self.log.lock().unwrap().frames.len()
    }

    pub fn closed(&self) -> usize {
        self.log.lock().unwrap().closed
    }
}

impl SinkFactory for MemorySinkFactory {
    type Sink = MemorySink;

    async fn open_sink(&self, path: &Path, spec: SinkSpec) -> Result<MemorySink, CaptureError> {
        let mut log = self.log.lock().unwrap();
        if log.fail_open {
            return Err(CaptureError::Sink {
                path: path.to_path_buf(),
                reason: "scripted sink refused".into(),
            });
        }
        std::fs::write(path, b"").map_err(|e| CaptureError::io(path, e))?;
        log.opened.push((path.to_path_buf(), spec));
        Ok(MemorySink {
            log: Arc::clone(&self.log),
            path: path.to_path_buf(),
            written: 0,
        })
    }
}

impl ClipSink for MemorySink {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), CaptureError> {
        let mut log = self.log.lock().unwrap();
        if log.fail_after.is_some_and(|n| log.frames.len() >= n) {
            return Err(CaptureError::Sink {
                path: self.path.clone(),
                reason: "scripted write failure".into(),
            });
        }
        log.frames.push(frame.clone());
        self.written += 1;
        Ok(())
    }

    async fn close(self) -> Result<u32, CaptureError> {
        self.log.lock().unwrap().closed += 1;
        Ok(self.written)
    }
}
