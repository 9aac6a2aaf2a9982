//! Frame -> position pipeline
//!
//! grayscale -> 9x9 Gaussian (sigma 2) -> gradient Hough circle search
//! restricted to the radius band the simulator draws with.

use image::{imageops, GrayImage, RgbImage};
use imageproc::filter::separable_filter_equal;

use super::hough::{find_circles, HoughParams};
use super::DetectionResult;
use crate::error::{AppError, Result};
use crate::video::{PixelFormat, VideoFrame};

const BLUR_KERNEL_SIZE: usize = 9;
const BLUR_SIGMA: f32 = 2.0;

const SEARCH: HoughParams = HoughParams {
    min_dist: 50.0,
    edge_threshold: 50.0,
    accumulator_threshold: 30,
    min_radius: 10,
    max_radius: 30,
};

/// Stateless ball detector with fixed parameters
#[derive(Debug, Clone)]
pub struct BallDetector {
    kernel: Vec<f32>,
}

impl BallDetector {
    pub fn new() -> Self {
        Self {
            kernel: gaussian_kernel(BLUR_KERNEL_SIZE, BLUR_SIGMA),
        }
    }

    /// Detect the ball in a decoded RGB24 frame
    pub fn detect(&self, frame: &VideoFrame) -> Result<DetectionResult> {
        if frame.format != PixelFormat::Rgb24 {
            return Err(AppError::Detection(format!(
                "Unsupported frame format {}",
                frame.format
            )));
        }
        Ok(self.detect_image(&frame.to_rgb_image()?))
    }

    /// Detect the ball in an RGB image
    pub fn detect_image(&self, image: &RgbImage) -> DetectionResult {
        let smoothed = self.smooth(&imageops::grayscale(image));

        // Only the strongest candidate counts
        match find_circles(&smoothed, &SEARCH).first() {
            Some(c) => DetectionResult::Found {
                x: c.x as f64,
                y: c.y as f64,
            },
            None => DetectionResult::NotFound,
        }
    }

    fn smooth(&self, gray: &GrayImage) -> GrayImage {
        separable_filter_equal(gray, &self.kernel)
    }
}

impl Default for BallDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalized 1-D Gaussian kernel
fn gaussian_kernel(size: usize, sigma: f32) -> Vec<f32> {
    let half = (size / 2) as f32;
    let weights: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - half;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ball::{BallSimulator, BallState};
    use crate::video::{JpegCodec, Resolution, VIDEO_TIME_BASE};
    use image::Rgb;

    fn ball_frame(x: f64, y: f64) -> VideoFrame {
        let sim = BallSimulator::with_state(
            Resolution::new(900, 600),
            BallState {
                x,
                y,
                vx: 15,
                vy: 15,
                radius: 20,
                color: [128, 255, 128],
            },
        );
        VideoFrame::from_rgb(sim.render(), 0, VIDEO_TIME_BASE)
    }

    fn assert_near(result: DetectionResult, x: f64, y: f64) {
        match result {
            DetectionResult::Found { x: fx, y: fy } => {
                assert!((fx - x).abs() <= 2.0 && (fy - y).abs() <= 2.0, "{:?}", result);
                assert_eq!(fx.fract(), 0.0);
                assert_eq!(fy.fract(), 0.0);
            }
            DetectionResult::NotFound => panic!("ball at ({}, {}) not found", x, y),
        }
    }

    #[test]
    fn test_kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel(9, 2.0);
        assert_eq!(k.len(), 9);
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        for i in 0..4 {
            assert!((k[i] - k[8 - i]).abs() < 1e-7);
        }
        assert!(k[4] > k[3]);
    }

    #[test]
    fn test_finds_rendered_ball() {
        let detector = BallDetector::new();
        assert_near(detector.detect(&ball_frame(450.0, 300.0)).unwrap(), 450.0, 300.0);
        assert_near(detector.detect(&ball_frame(120.0, 480.0)).unwrap(), 120.0, 480.0);
    }

    #[test]
    fn test_finds_ball_after_jpeg_roundtrip() {
        let codec = JpegCodec::default();
        let frame = ball_frame(300.0, 200.0);
        let decoded = codec
            .decode(&codec.encode(&frame).unwrap(), frame.pts, frame.time_base)
            .unwrap();
        assert_near(BallDetector::new().detect(&decoded).unwrap(), 300.0, 200.0);
    }

    #[test]
    fn test_blank_frame_not_found() {
        let image = RgbImage::from_pixel(900, 600, Rgb([1, 1, 1]));
        let frame = VideoFrame::from_rgb(image, 0, VIDEO_TIME_BASE);
        assert_eq!(
            BallDetector::new().detect(&frame).unwrap(),
            DetectionResult::NotFound
        );
    }

    #[test]
    fn test_rejects_compressed_frame() {
        let frame = VideoFrame::new(
            bytes::Bytes::from_static(&[0xFF, 0xD8]),
            Resolution::new(900, 600),
            PixelFormat::Jpeg,
            0,
            VIDEO_TIME_BASE,
        )
        .unwrap();
        assert!(BallDetector::new().detect(&frame).is_err());
    }
}
