//! Video frame data structures

use bytes::Bytes;
use image::RgbImage;

use super::format::{PixelFormat, Resolution, TimeBase};
use crate::error::{AppError, Result};

/// A video frame with metadata
///
/// Frames are immutable once built; cloning shares the pixel buffer.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Raw frame data
    data: Bytes,
    /// Frame resolution
    pub resolution: Resolution,
    /// Pixel format
    pub format: PixelFormat,
    /// Presentation timestamp in `time_base` units
    pub pts: u64,
    /// Time base of `pts`
    pub time_base: TimeBase,
}

impl VideoFrame {
    /// Create a new video frame, checking the buffer against the format
    pub fn new(
        data: Bytes,
        resolution: Resolution,
        format: PixelFormat,
        pts: u64,
        time_base: TimeBase,
    ) -> Result<Self> {
        if let Some(expected) = format.frame_size(resolution) {
            if data.len() != expected {
                return Err(AppError::VideoError(format!(
                    "{} {} frame needs {} bytes, got {}",
                    resolution,
                    format,
                    expected,
                    data.len()
                )));
            }
        }

        Ok(Self {
            data,
            resolution,
            format,
            pts,
            time_base,
        })
    }

    /// Wrap an RGB image
    pub fn from_rgb(image: RgbImage, pts: u64, time_base: TimeBase) -> Self {
        let resolution = Resolution::new(image.width(), image.height());
        Self {
            data: Bytes::from(image.into_raw()),
            resolution,
            format: PixelFormat::Rgb24,
            pts,
            time_base,
        }
    }

    /// Get frame data as bytes slice
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get width
    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    /// Get height
    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    /// Presentation time in seconds
    pub fn time(&self) -> f64 {
        self.time_base.seconds(self.pts)
    }

    /// Copy out as an RGB image (RGB24 frames only)
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        if self.format != PixelFormat::Rgb24 {
            return Err(AppError::VideoError(format!(
                "Expected rgb24 frame, got {}",
                self.format
            )));
        }
        RgbImage::from_raw(self.width(), self.height(), self.data.to_vec()).ok_or_else(|| {
            AppError::VideoError(format!("Buffer too small for {}", self.resolution))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TB: TimeBase = TimeBase::new(1, 90000);

    #[test]
    fn test_new_checks_buffer_size() {
        let res = Resolution::new(4, 2);
        assert!(VideoFrame::new(Bytes::from(vec![0u8; 24]), res, PixelFormat::Rgb24, 0, TB).is_ok());
        assert!(VideoFrame::new(Bytes::from(vec![0u8; 23]), res, PixelFormat::Rgb24, 0, TB).is_err());
        // Compressed payloads have no fixed size
        assert!(VideoFrame::new(Bytes::from(vec![0u8; 5]), res, PixelFormat::Jpeg, 0, TB).is_ok());
    }

    #[test]
    fn test_rgb_image_roundtrip() {
        let mut image = RgbImage::new(3, 2);
        image.put_pixel(1, 1, image::Rgb([10, 20, 30]));

        let frame = VideoFrame::from_rgb(image.clone(), 6000, TB);
        assert_eq!(frame.resolution, Resolution::new(3, 2));
        assert!((frame.time() - 6000.0 / 90000.0).abs() < 1e-12);
        assert_eq!(frame.to_rgb_image().unwrap(), image);
    }
}
