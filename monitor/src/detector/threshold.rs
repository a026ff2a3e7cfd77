use camwatch_common::config::DetectorConfig;

/// How many changed pixels a frame needs before it counts as a scene change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PixelThreshold {
    /// Fixed changed-pixel count, independent of resolution.
    Absolute(u64),
    /// Fraction of the frame's total pixel count.
    Fraction(f64),
}

impl PixelThreshold {
    pub fn from_config(config: &DetectorConfig) -> Self {
        match config.pixel_count_threshold {
            Some(count) => PixelThreshold::Absolute(count),
            None => PixelThreshold::Fraction(config.changed_fraction),
        }
    }

    /// Resolve to a changed-pixel count for a frame of `total_pixels` pixels.
    pub fn resolve(&self, total_pixels: u64) -> u64 {
        match *self {
            PixelThreshold::Absolute(count) => count,
            PixelThreshold::Fraction(fraction) => {
                (fraction.clamp(0.0, 1.0) * total_pixels as f64).floor() as u64
            }
        }
    }
}
