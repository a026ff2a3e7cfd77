use chrono::{DateTime, Local};
use image::{GrayImage, RgbImage};

/// A decoded camera frame with capture metadata.
///
/// Pixels are packed RGB8. The single-channel intensity buffer used for
/// change detection is derived on demand with [`Frame::luma`] and always has
/// the same dimensions as the colour image.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: DateTime<Local>,
    /// Position of this frame within the stream handle that produced it.
    pub seq: u64,
}

impl Frame {
    pub fn new(image: RgbImage, seq: u64) -> Self {
        Self {
            image,
            captured_at: Local::now(),
            seq,
        }
    }

    /// Build a frame from a raw packed RGB24 buffer, as emitted by a
    /// rawvideo decoder. Returns `None` if the buffer length does not match
    /// `width * height * 3`.
    pub fn from_rgb24(width: u32, height: u32, data: Vec<u8>, seq: u64) -> Option<Self> {
        RgbImage::from_raw(width, height, data).map(|image| Self::new(image, seq))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Total pixel count.
    pub fn pixel_count(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// True when the frame carries no pixels (a decoder that has not warmed up yet).
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Luminance-weighted grayscale conversion of the frame.
    pub fn luma(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }

    /// Raw packed RGB24 bytes, for feeding a rawvideo encoder.
    pub fn as_rgb24(&self) -> &[u8] {
        self.image.as_raw()
    }
}
