use camwatch_common::config::DetectorConfig;
use camwatch_common::frame::Frame;
use image::GrayImage;
use tracing::debug;

use super::threshold::PixelThreshold;
use crate::error::CaptureError;

/// Outcome of comparing one frame against the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeVerdict {
    pub changed: bool,
    /// Number of pixels whose intensity moved by more than the sensitivity.
    pub magnitude: u64,
}

/// A verdict together with the baseline that must replace the old one.
#[derive(Debug, Clone)]
pub struct Detection {
    pub verdict: ChangeVerdict,
    pub baseline: GrayImage,
}

/// Absolute-difference change detector.
///
/// Algorithm:
/// 1. Convert the frame to a luminance-weighted grayscale buffer
/// 2. Absolute per-pixel difference against the previous grayscale buffer
/// 3. Binary threshold: a pixel counts when its delta exceeds `sensitivity`
/// 4. The scene changed when the counted pixels exceed the pixel threshold
///
/// There is no background model: every frame is compared with the frame
/// sampled immediately before it.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    sensitivity: u8,
    threshold: PixelThreshold,
}

impl ChangeDetector {
    pub fn new(sensitivity: u8, threshold: PixelThreshold) -> Self {
        Self {
            sensitivity,
            threshold,
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(config.sensitivity, PixelThreshold::from_config(config))
    }

    pub fn detect(&self, frame: &Frame, baseline: Option<&GrayImage>) -> Detection {
        let gray = frame.luma();

        let Some(prev) = baseline else {
            debug!(seq = frame.seq, "no baseline, first frame counts as changed");
            return Detection {
                verdict: ChangeVerdict {
                    changed: true,
                    magnitude: 0,
                },
                baseline: gray,
            };
        };

        let verdict = match count_changed(prev, &gray, self.sensitivity) {
            Ok(magnitude) => {
                let limit = self.threshold.resolve(frame.pixel_count());
                let changed = magnitude > limit;
                debug!(
                    seq = frame.seq,
                    magnitude,
                    limit,
                    sensitivity = self.sensitivity,
                    changed,
                    "frame difference"
                );
                ChangeVerdict { changed, magnitude }
            }
            Err(e) => {
                // Resolution renegotiated: the old baseline is meaningless.
                debug!(error = %e, "baseline reset");
                ChangeVerdict {
                    changed: true,
                    magnitude: 0,
                }
            }
        };

        Detection {
            verdict,
            baseline: gray,
        }
    }
}

/// Count pixels whose absolute intensity difference exceeds `sensitivity`.
pub fn count_changed(
    baseline: &GrayImage,
    current: &GrayImage,
    sensitivity: u8,
) -> Result<u64, CaptureError> {
    if baseline.dimensions() != current.dimensions() {
        return Err(CaptureError::DimensionMismatch {
            baseline: baseline.dimensions(),
            frame: current.dimensions(),
        });
    }
    let count = baseline
        .as_raw()
        .iter()
        .zip(current.as_raw())
        .filter(|(a, b)| a.abs_diff(**b) > sensitivity)
        .count();
    Ok(count as u64)
}
