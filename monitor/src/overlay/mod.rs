//! Frame decoration applied before a frame is persisted: a semi-transparent
//! watermark in the bottom-right corner and a caption in the bottom-left.

mod font;

use camwatch_common::config::OverlayConfig;
use camwatch_common::frame::Frame;
use image::{Rgb, RgbImage, RgbaImage};
use std::path::Path;
use tracing::{debug, warn};

const WATERMARK_OPACITY: f32 = 0.5;
/// Gap between the watermark and the right/bottom frame edges.
const WATERMARK_MARGIN: i64 = 10;
const CAPTION_X: i64 = 10;
/// Caption baseline distance from the bottom edge.
const CAPTION_BASELINE_OFFSET: i64 = 20;
/// Screen pixels per font unit.
const CAPTION_SCALE: i64 = 3;
const CAPTION_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

pub struct Overlay {
    watermark: Option<RgbaImage>,
    caption: String,
}

impl Overlay {
    pub fn new(watermark: Option<RgbaImage>, caption: impl Into<String>) -> Self {
        Self {
            watermark,
            caption: caption.into(),
        }
    }

    pub fn from_config(config: &OverlayConfig) -> Self {
        Self::load(&config.watermark_path, config.caption.clone())
    }

    /// Load the watermark from `path`. A missing, unreadable or opaque
    /// (no alpha channel) image leaves the overlay caption-only.
    pub fn load(path: &Path, caption: impl Into<String>) -> Self {
        let watermark = match image::open(path) {
            Ok(img) if img.color().has_alpha() => {
                debug!(
                    path = %path.display(),
                    width = img.width(),
                    height = img.height(),
                    "watermark loaded"
                );
                Some(img.to_rgba8())
            }
            Ok(_) => {
                warn!(path = %path.display(), "watermark has no alpha channel, skipping it");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "watermark unavailable, caption only");
                None
            }
        };
        Self::new(watermark, caption)
    }

    pub fn has_watermark(&self) -> bool {
        self.watermark.is_some()
    }

    /// Decorate `frame` in place. Never changes its dimensions.
    pub fn apply(&self, frame: &mut Frame) {
        if let Some(mark) = &self.watermark {
            blend_watermark(&mut frame.image, mark);
        }
        draw_caption(&mut frame.image, &self.caption);
    }
}

fn blend_watermark(image: &mut RgbImage, mark: &RgbaImage) {
    let (width, height) = (image.width() as i64, image.height() as i64);
    let left = width - mark.width() as i64 - WATERMARK_MARGIN;
    let top = height - mark.height() as i64 - WATERMARK_MARGIN;

    for (mx, my, px) in mark.enumerate_pixels() {
        let (x, y) = (left + mx as i64, top + my as i64);
        if x < 0 || y < 0 || x >= width || y >= height {
            continue;
        }
        let alpha = WATERMARK_OPACITY * px.0[3] as f32 / 255.0;
        if alpha <= 0.0 {
            continue;
        }
        let dst = image.get_pixel_mut(x as u32, y as u32);
        for c in 0..3 {
            let blended = dst.0[c] as f32 * (1.0 - alpha) + px.0[c] as f32 * alpha;
            dst.0[c] = blended.round().clamp(0.0, 255.0) as u8;
        }
    }
}

fn draw_caption(image: &mut RgbImage, text: &str) {
    let (width, height) = (image.width() as i64, image.height() as i64);
    let top = height - CAPTION_BASELINE_OFFSET - font::GLYPH_HEIGHT as i64 * CAPTION_SCALE;
    let advance = (font::GLYPH_WIDTH as i64 + 1) * CAPTION_SCALE;

    for (i, c) in text.chars().enumerate() {
        let left = CAPTION_X + i as i64 * advance;
        if left >= width {
            break;
        }
        let Some(rows) = font::glyph(c) else {
            continue;
        };
        for row in 0..font::GLYPH_HEIGHT {
            for col in 0..font::GLYPH_WIDTH {
                if !font::is_set(&rows, col, row) {
                    continue;
                }
                let x0 = left + col as i64 * CAPTION_SCALE;
                let y0 = top + row as i64 * CAPTION_SCALE;
                for dy in 0..CAPTION_SCALE {
                    for dx in 0..CAPTION_SCALE {
                        let (x, y) = (x0 + dx, y0 + dy);
                        if x >= 0 && y >= 0 && x < width && y < height {
                            image.put_pixel(x as u32, y as u32, CAPTION_COLOR);
                        }
                    }
                }
            }
        }
    }
}
