use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;

use crate::error::AppError;
use crate::pipeline::types::Frame;

/// Encoding capability consumed by the dispatcher. Kept behind a trait so
/// tests can count invocations and transports can swap formats.
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, frame: &Frame) -> Result<Bytes, AppError>;
}

pub struct JpegFrameEncoder {
    quality: u8,
}

impl JpegFrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self { quality }
    }
}

impl FrameEncoder for JpegFrameEncoder {
    fn encode(&self, frame: &Frame) -> Result<Bytes, AppError> {
        let mut buffer = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, self.quality);
        encoder.encode_image(&frame.image)?;
        Ok(Bytes::from(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn produces_a_jpeg_payload() {
        let encoder = JpegFrameEncoder::new(85);
        let frame = Frame::new(RgbImage::new(16, 16), 0);
        let data = encoder.encode(&frame).expect("encode");
        // JPEG SOI marker.
        assert_eq!(&data[..2], &[0xff, 0xd8]);
    }
}
