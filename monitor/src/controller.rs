use camwatch_common::config::{CaptureMode, ClipCodec, Config};
use camwatch_common::frame::Frame;
use image::GrayImage;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::detector::{ChangeDetector, ChangeVerdict};
use crate::error::CaptureError;
use crate::overlay::Overlay;
use crate::recorder::{self, ClipRequest, ClipSummary, SinkFactory};
use crate::snapshot;
use crate::source::{read_with_warmup, FrameSource, ReadMode, StreamOpener, WARMUP_READ_ATTEMPTS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Not started; no baseline yet.
    Idle,
    /// Acquiring a frame.
    Polling,
    /// Persisting a snapshot or recording a clip.
    Capturing,
    /// Tick ended without output.
    Skipping,
    Stopped,
}

/// Result of a single tick.
#[derive(Debug)]
pub enum TickOutcome {
    Captured(PathBuf),
    Recorded(ClipSummary),
    Skipped(ChangeVerdict),
    /// No frame could be read; the baseline was left untouched.
    AcquireFailed,
    /// Change detected but persisting it failed.
    CaptureFailed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub captures: u64,
    pub failures: u64,
}

impl RunSummary {
    fn record(&mut self, outcome: &TickOutcome) {
        self.ticks += 1;
        match outcome {
            TickOutcome::Captured(_) | TickOutcome::Recorded(_) => self.captures += 1,
            TickOutcome::AcquireFailed | TickOutcome::CaptureFailed => self.failures += 1,
            TickOutcome::Skipped(_) => {}
        }
    }
}

/// Session settings, fixed for the lifetime of one run.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub mode: CaptureMode,
    pub poll_interval: Duration,
    pub clip_duration_secs: u64,
    pub output_dir: PathBuf,
    pub codec: ClipCodec,
    pub decorate_clips: bool,
}

impl LoopSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.capture.mode,
            poll_interval: Duration::from_secs(config.capture.poll_interval_secs),
            clip_duration_secs: config.capture.clip_duration_secs,
            output_dir: config.capture.output_dir.clone(),
            codec: config.capture.codec,
            decorate_clips: config.overlay.decorate_clips,
        }
    }

    /// Pause between ticks.
    fn pause(&self) -> Duration {
        match self.mode {
            CaptureMode::Snapshot => self.poll_interval,
            CaptureMode::Clip => Duration::from_secs(self.clip_duration_secs),
        }
    }
}

/// Drives the poll / detect / capture cycle for one stream.
///
/// Owns the baseline: it is replaced after every processed frame and left
/// alone when acquisition fails.
pub struct CaptureLoop<O: StreamOpener, F: SinkFactory> {
    opener: O,
    sinks: F,
    detector: ChangeDetector,
    overlay: Overlay,
    settings: LoopSettings,
    locator: String,
    baseline: Option<GrayImage>,
    poll_source: Option<O::Source>,
    state: LoopState,
}

impl<O: StreamOpener, F: SinkFactory> CaptureLoop<O, F> {
    pub fn new(
        opener: O,
        sinks: F,
        detector: ChangeDetector,
        overlay: Overlay,
        settings: LoopSettings,
        locator: String,
    ) -> Self {
        Self {
            opener,
            sinks,
            detector,
            overlay,
            settings,
            locator,
            baseline: None,
            poll_source: None,
            state: LoopState::Idle,
        }
    }

    #[allow(dead_code)]
    pub fn state(&self) -> LoopState {
        self.state
    }

    #[allow(dead_code)]
    pub fn baseline(&self) -> Option<&GrayImage> {
        self.baseline.as_ref()
    }

    /// Run until `cancel` fires. The token is checked between ticks only, so
    /// a capture in progress always completes.
    ///
    /// Fails only when the stream cannot be reached on the first connect.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RunSummary, CaptureError> {
        let mut summary = RunSummary::default();

        if !cancel.is_cancelled() {
            let source = self.opener.open(&self.locator, ReadMode::Latest).await?;
            self.poll_source = Some(source);
            info!(mode = ?self.settings.mode, "capture loop started");
        }

        while !cancel.is_cancelled() {
            let outcome = self.tick().await;
            summary.record(&outcome);

            let pause = self.settings.pause();
            if !pause.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        self.release_poll_source().await;
        self.state = LoopState::Stopped;
        info!(
            ticks = summary.ticks,
            captures = summary.captures,
            failures = summary.failures,
            "capture loop stopped"
        );
        Ok(summary)
    }

    /// One poll / detect / capture cycle.
    pub async fn tick(&mut self) -> TickOutcome {
        self.state = LoopState::Polling;

        let frame = match self.acquire().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "frame acquisition failed, keeping baseline");
                // Reopen on the next tick rather than reuse a stalled handle.
                self.release_poll_source().await;
                self.state = LoopState::Skipping;
                return TickOutcome::AcquireFailed;
            }
        };

        let detection = self.detector.detect(&frame, self.baseline.as_ref());
        let first = self.baseline.is_none();
        self.baseline = Some(detection.baseline);
        let verdict = detection.verdict;

        if !verdict.changed {
            debug!(magnitude = verdict.magnitude, seq = frame.seq, "no change, frame ignored");
            self.state = LoopState::Skipping;
            return TickOutcome::Skipped(verdict);
        }

        if first {
            info!(seq = frame.seq, "first frame, captured by default");
        } else {
            info!(magnitude = verdict.magnitude, seq = frame.seq, "change detected");
        }
        self.state = LoopState::Capturing;

        let outcome = match self.settings.mode {
            CaptureMode::Snapshot => {
                let mut frame = frame;
                self.overlay.apply(&mut frame);
                match snapshot::save(&frame, &self.settings.output_dir).await {
                    Ok(path) => TickOutcome::Captured(path),
                    Err(e) => {
                        error!(error = %e, "snapshot failed");
                        TickOutcome::CaptureFailed
                    }
                }
            }
            CaptureMode::Clip => {
                // The recorder opens its own handle on the live feed.
                self.release_poll_source().await;
                let request = ClipRequest {
                    locator: &self.locator,
                    output_dir: &self.settings.output_dir,
                    duration_secs: self.settings.clip_duration_secs,
                    codec: self.settings.codec,
                };
                let overlay = self.settings.decorate_clips.then_some(&self.overlay);
                match recorder::record(&self.opener, &self.sinks, &request, overlay).await {
                    Ok(summary) => TickOutcome::Recorded(summary),
                    Err(e) => {
                        error!(error = %e, "clip recording failed");
                        TickOutcome::CaptureFailed
                    }
                }
            }
        };
        self.state = LoopState::Polling;
        outcome
    }

    async fn acquire(&mut self) -> Result<Frame, CaptureError> {
        if self.poll_source.is_none() {
            let source = self.opener.open(&self.locator, ReadMode::Latest).await?;
            self.poll_source = Some(source);
        }
        let Some(source) = self.poll_source.as_mut() else {
            return Err(CaptureError::Stream("polling handle unavailable".into()));
        };
        read_with_warmup(source, WARMUP_READ_ATTEMPTS).await
    }

    async fn release_poll_source(&mut self) {
        if let Some(source) = self.poll_source.take() {
            source.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::threshold::PixelThreshold;
    use crate::testing::{flat_frame, MemorySinkFactory, ScriptedOpener};
    use image::Rgb;
    use std::path::Path;

    fn settings(mode: CaptureMode, dir: &Path) -> LoopSettings {
        LoopSettings {
            mode,
            poll_interval: Duration::ZERO,
            clip_duration_secs: 1,
            output_dir: dir.to_path_buf(),
            codec: ClipCodec::Mjpeg,
            decorate_clips: true,
        }
    }

    fn capture_loop(
        opener: ScriptedOpener,
        sinks: MemorySinkFactory,
        settings: LoopSettings,
    ) -> CaptureLoop<ScriptedOpener, MemorySinkFactory> {
        CaptureLoop::new(
            opener,
            sinks,
            ChangeDetector::new(25, PixelThreshold::Absolute(100)),
            Overlay::new(None, "TEST"),
            settings,
            "test://cam".into(),
        )
    }

    fn quiet() -> Frame {
        flat_frame(64, 48, 100)
    }

    /// The quiet scene with a bright 32x24 block in the middle.
    fn busy() -> Frame {
        let mut frame = quiet();
        for y in 12..36 {
            for x in 16..48 {
                frame.image.put_pixel(x, y, Rgb([250, 250, 250]));
            }
        }
        frame
    }

    fn empty() -> Frame {
        Frame::new(image::RgbImage::new(0, 0), 0)
    }

    fn files_in(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn four_ticks_write_first_and_changed_frames() {
        let dir = tempfile::tempdir().unwrap();
        let opener = ScriptedOpener::new(vec![quiet(), quiet(), quiet(), busy()]);
        let mut lp = capture_loop(
            opener,
            MemorySinkFactory::default(),
            settings(CaptureMode::Snapshot, dir.path()),
        );

        let outcomes = [lp.tick().await, lp.tick().await, lp.tick().await, lp.tick().await];

        assert!(matches!(outcomes[0], TickOutcome::Captured(_)));
        assert!(matches!(outcomes[1], TickOutcome::Skipped(_)));
        assert!(matches!(outcomes[2], TickOutcome::Skipped(_)));
        assert!(matches!(outcomes[3], TickOutcome::Captured(_)));
        assert_eq!(files_in(dir.path()), 2);
    }

    #[tokio::test]
    async fn run_stops_on_cancel_and_releases_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let opener = ScriptedOpener::new(vec![quiet(), quiet(), quiet(), busy()])
            .cancel_when_exhausted(cancel.clone());
        let mut lp = capture_loop(
            opener.clone(),
            MemorySinkFactory::default(),
            settings(CaptureMode::Snapshot, dir.path()),
        );

        let summary = lp.run(&cancel).await.unwrap();

        assert_eq!(summary.captures, 2);
        // the fifth tick found the feed empty
        assert_eq!(summary.ticks, 5);
        assert_eq!(summary.failures, 1);
        assert_eq!(files_in(dir.path()), 2);
        assert_eq!(lp.state(), LoopState::Stopped);
        assert_eq!(opener.opens(), opener.closes());
    }

    #[tokio::test]
    async fn cancelled_before_start_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let opener = ScriptedOpener::new(vec![quiet()]);
        let mut lp = capture_loop(
            opener.clone(),
            MemorySinkFactory::default(),
            settings(CaptureMode::Snapshot, dir.path()),
        );

        let summary = lp.run(&cancel).await.unwrap();

        assert_eq!(summary, RunSummary::default());
        assert_eq!(opener.opens(), 0);
        assert_eq!(files_in(dir.path()), 0);
    }

    #[tokio::test]
    async fn unreachable_stream_on_first_connect_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let opener = ScriptedOpener::new(vec![quiet()]).failing();
        let mut lp = capture_loop(
            opener,
            MemorySinkFactory::default(),
            settings(CaptureMode::Snapshot, dir.path()),
        );

        let err = lp.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, CaptureError::Stream(_)));
    }

    #[tokio::test]
    async fn failed_acquisition_keeps_the_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let mut script = vec![quiet()];
        script.extend((0..WARMUP_READ_ATTEMPTS).map(|_| empty()));
        script.push(busy());
        let opener = ScriptedOpener::new(script);
        let mut lp = capture_loop(
            opener.clone(),
            MemorySinkFactory::default(),
            settings(CaptureMode::Snapshot, dir.path()),
        );

        lp.tick().await;
        let before = lp.baseline().cloned();

        assert!(matches!(lp.tick().await, TickOutcome::AcquireFailed));
        assert_eq!(lp.baseline().cloned(), before);
        assert_eq!(opener.closes(), 1);

        // compared against the pre-failure baseline, so still a change
        assert!(matches!(lp.tick().await, TickOutcome::Captured(_)));
        assert_eq!(opener.opens(), 2);
        assert_eq!(files_in(dir.path()), 2);
    }

    #[tokio::test]
    async fn transient_reopen_failure_is_absorbed() {
        let dir = tempfile::tempdir().unwrap();
        let opener = ScriptedOpener::new(vec![quiet(), busy()]);
        let mut lp = capture_loop(
            opener.clone(),
            MemorySinkFactory::default(),
            settings(CaptureMode::Snapshot, dir.path()),
        );

        opener.set_failing(true);
        assert!(matches!(lp.tick().await, TickOutcome::AcquireFailed));
        assert!(lp.baseline().is_none());

        opener.set_failing(false);
        assert!(matches!(lp.tick().await, TickOutcome::Captured(_)));
        assert!(matches!(lp.tick().await, TickOutcome::Captured(_)));
    }

    #[tokio::test]
    async fn resolution_change_resets_the_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let opener = ScriptedOpener::new(vec![quiet(), flat_frame(32, 24, 100)]);
        let mut lp = capture_loop(
            opener,
            MemorySinkFactory::default(),
            settings(CaptureMode::Snapshot, dir.path()),
        );

        lp.tick().await;
        assert!(matches!(lp.tick().await, TickOutcome::Captured(_)));
        assert_eq!(lp.baseline().map(|b| b.dimensions()), Some((32, 24)));
    }

    #[tokio::test]
    async fn snapshot_write_failure_keeps_the_loop_alive() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let opener = ScriptedOpener::new(vec![quiet(), quiet()]);
        let mut lp = capture_loop(
            opener,
            MemorySinkFactory::default(),
            settings(CaptureMode::Snapshot, &blocker),
        );

        assert!(matches!(lp.tick().await, TickOutcome::CaptureFailed));
        assert!(lp.baseline().is_some());
        assert!(matches!(lp.tick().await, TickOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn clip_mode_records_on_its_own_handle() {
        let dir = tempfile::tempdir().unwrap();
        let script: Vec<Frame> = (0..40).map(|_| quiet()).collect();
        let opener = ScriptedOpener::new(script).with_fps(25.0);
        let sinks = MemorySinkFactory::default();
        let mut lp = capture_loop(
            opener.clone(),
            sinks.clone(),
            settings(CaptureMode::Clip, dir.path()),
        );

        let TickOutcome::Recorded(summary) = lp.tick().await else {
            panic!("first frame should trigger a recording");
        };

        assert_eq!(summary.frames_written, 25);
        assert_eq!(sinks.frames_written(), 25);
        assert_eq!(opener.modes(), vec![ReadMode::Latest, ReadMode::Sequential]);
        // polling handle released before recording, recorder handle after
        assert_eq!(opener.opens(), 2);
        assert_eq!(opener.closes(), 2);

        assert!(matches!(lp.tick().await, TickOutcome::Skipped(_)));
        assert_eq!(opener.opens(), 3);
    }

    #[tokio::test]
    async fn clip_failure_keeps_the_loop_alive() {
        let dir = tempfile::tempdir().unwrap();
        let script: Vec<Frame> = (0..10).map(|_| quiet()).collect();
        let opener = ScriptedOpener::new(script);
        let mut lp = capture_loop(
            opener.clone(),
            MemorySinkFactory::default().failing_open(),
            settings(CaptureMode::Clip, dir.path()),
        );

        assert!(matches!(lp.tick().await, TickOutcome::CaptureFailed));
        assert_eq!(opener.opens(), opener.closes());
        assert!(matches!(lp.tick().await, TickOutcome::Skipped(_)));
    }

    #[test]
    fn clip_mode_pauses_for_the_clip_duration() {
        let mut s = settings(CaptureMode::Clip, Path::new("/tmp"));
        s.clip_duration_secs = 10;
        s.poll_interval = Duration::from_secs(5);
        assert_eq!(s.pause(), Duration::from_secs(10));
        s.mode = CaptureMode::Snapshot;
        assert_eq!(s.pause(), Duration::from_secs(5));
    }
}
