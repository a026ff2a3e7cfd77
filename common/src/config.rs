use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Historical absolute change threshold, tuned for 1920x1080 frames.
pub const LEGACY_PIXEL_COUNT_THRESHOLD: u64 = 245_000;
const LEGACY_FRAME_PIXELS: u64 = 1920 * 1080;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub stream: StreamConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Connectable stream URL, credentials already embedded.
    pub url: String,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Persist one decorated JPEG per detected change.
    Snapshot,
    /// Record a fixed-length video clip per detected change.
    Clip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipCodec {
    Mjpeg,
    H264,
}

impl ClipCodec {
    /// Container extension used for clips encoded with this codec.
    pub fn extension(&self) -> &'static str {
        match self {
            ClipCodec::Mjpeg => "avi",
            ClipCodec::H264 => "mp4",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_mode")]
    pub mode: CaptureMode,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_clip_duration")]
    pub clip_duration_secs: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_codec")]
    pub codec: ClipCodec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Per-pixel intensity delta a pixel must exceed to count as changed.
    #[serde(default = "default_sensitivity")]
    pub sensitivity: u8,
    /// Share of the frame that must change for a capture.
    #[serde(default = "default_changed_fraction")]
    pub changed_fraction: f64,
    /// Absolute changed-pixel count; overrides `changed_fraction` when set.
    #[serde(default)]
    pub pixel_count_threshold: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverlayConfig {
    #[serde(default = "default_watermark_path")]
    pub watermark_path: PathBuf,
    #[serde(default = "default_caption")]
    pub caption: String,
    #[serde(default = "default_decorate_clips")]
    pub decorate_clips: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            poll_interval_secs: default_poll_interval(),
            clip_duration_secs: default_clip_duration(),
            output_dir: default_output_dir(),
            codec: default_codec(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sensitivity: default_sensitivity(),
            changed_fraction: default_changed_fraction(),
            pixel_count_threshold: None,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            watermark_path: default_watermark_path(),
            caption: default_caption(),
            decorate_clips: default_decorate_clips(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.url.trim().is_empty() {
            return Err(ConfigError::Invalid("stream.url must not be empty".into()));
        }
        if self.capture.clip_duration_secs == 0 {
            return Err(ConfigError::Invalid(
                "capture.clip_duration_secs must be at least 1".into(),
            ));
        }
        let fraction = self.detector.changed_fraction;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ConfigError::Invalid(format!(
                "detector.changed_fraction must be within [0, 1], got {fraction}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_read_timeout() -> u64 {
    10
}
fn default_mode() -> CaptureMode {
    CaptureMode::Snapshot
}
fn default_poll_interval() -> u64 {
    5
}
fn default_clip_duration() -> u64 {
    10
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("capture")
}
fn default_codec() -> ClipCodec {
    ClipCodec::Mjpeg
}
fn default_sensitivity() -> u8 {
    25
}
fn default_changed_fraction() -> f64 {
    LEGACY_PIXEL_COUNT_THRESHOLD as f64 / LEGACY_FRAME_PIXELS as f64
}
fn default_watermark_path() -> PathBuf {
    PathBuf::from("watermark.png")
}
fn default_caption() -> String {
    "camwatch".into()
}
fn default_decorate_clips() -> bool {
    true
}
fn default_log_level() -> String {
    "info".into()
}
