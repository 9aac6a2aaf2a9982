//! Pixel format and timing definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported pixel formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// RGB24 format (3 bytes per pixel)
    Rgb24,
    /// JPEG compressed format
    Jpeg,
}

impl PixelFormat {
    /// Bytes per pixel for uncompressed formats
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Rgb24 => Some(3),
            PixelFormat::Jpeg => None,
        }
    }

    /// Expected buffer size for a frame of this format
    pub fn frame_size(&self, resolution: Resolution) -> Option<usize> {
        self.bytes_per_pixel()
            .map(|bpp| resolution.pixels() as usize * bpp)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Jpeg => "jpeg",
        };
        write!(f, "{}", name)
    }
}

/// Frame resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Get total pixels
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Rational time base, e.g. 1/90000 for a 90 kHz clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Convert a presentation timestamp to seconds
    pub fn seconds(&self, pts: u64) -> f64 {
        pts as f64 * self.num as f64 / self.den as f64
    }
}

impl fmt::Display for TimeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}
