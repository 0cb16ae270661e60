use chrono::Utc;
use image::RgbImage;

/// A single decoded video frame. Immutable once produced by the source;
/// the renderer takes ownership before mutating pixels.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// Position in emission order, assigned by the source.
    pub seq: u64,
    pub captured_at: i64,
}

impl Frame {
    pub fn new(image: RgbImage, seq: u64) -> Self {
        Self {
            image,
            seq,
            captured_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel_area(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }
}
