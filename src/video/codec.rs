//! JPEG frame codec
//!
//! Raw RGB frames are far too large for RTP at 30 fps, so the track carries
//! each frame as a standalone JPEG picture.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};

use super::format::{PixelFormat, TimeBase};
use super::frame::VideoFrame;
use crate::error::{AppError, Result};

/// Encodes and decodes frames as baseline JPEG
#[derive(Debug, Clone, Copy)]
pub struct JpegCodec {
    quality: u8,
}

impl JpegCodec {
    /// Create a codec with the given quality (1-100)
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    /// Encode an RGB24 frame
    pub fn encode(&self, frame: &VideoFrame) -> Result<Bytes> {
        if frame.format != PixelFormat::Rgb24 {
            return Err(AppError::VideoError(format!(
                "Cannot JPEG-encode {} frame",
                frame.format
            )));
        }

        let mut out = Vec::with_capacity(frame.data().len() / 16);
        JpegEncoder::new_with_quality(&mut out, self.quality).encode(
            frame.data(),
            frame.width(),
            frame.height(),
            ExtendedColorType::Rgb8,
        )?;
        Ok(Bytes::from(out))
    }

    /// Decode a JPEG picture into an RGB24 frame
    pub fn decode(&self, data: &[u8], pts: u64, time_base: TimeBase) -> Result<VideoFrame> {
        let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?.to_rgb8();
        Ok(VideoFrame::from_rgb(image, pts, time_base))
    }
}

impl Default for JpegCodec {
    fn default() -> Self {
        Self::new(90)
    }
}
