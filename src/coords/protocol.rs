//! Coordinate wire format
//!
//! ASCII `x,y`: two decimal numbers, one comma, no whitespace. `-1,-1` is the
//! reserved "not found" pair. Legitimate detections are always strictly
//! inside the frame, so the sentinel can never collide with one.

use std::fmt;
use std::str::FromStr;

use crate::detection::DetectionResult;
use crate::error::{AppError, Result};
use crate::video::Resolution;

/// Greeting sent by the channel owner once the channel opens
pub const GREETING: &str = "Connection Open";

/// Acknowledgement sent by the reporter after each coordinate pair
pub const ACK: &str = "Coordinates received";

/// A coordinate pair as carried on the data channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMessage {
    pub x: f64,
    pub y: f64,
}

impl CoordinateMessage {
    /// Sentinel for a failed detection
    pub const NOT_FOUND: CoordinateMessage = CoordinateMessage { x: -1.0, y: -1.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Wire text for this pair
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parse wire text; anything but two finite numbers is rejected
    pub fn parse(text: &str) -> Result<Self> {
        let mut fields = text.split(',');
        let (Some(x), Some(y), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(AppError::Protocol(format!(
                "Expected two comma-separated fields: {:?}",
                text
            )));
        };
        Ok(Self::new(parse_field(x)?, parse_field(y)?))
    }

    /// Whether the pair lies strictly inside a frame of `resolution`
    pub fn is_valid_for(&self, resolution: Resolution) -> bool {
        self.x > 0.0
            && self.x < resolution.width as f64
            && self.y > 0.0
            && self.y < resolution.height as f64
    }
}

/// One decimal number: optional `-`, digits, optional `.` and digits
fn parse_field(field: &str) -> Result<f64> {
    let invalid = || AppError::Protocol(format!("Invalid coordinate {:?}", field));

    let unsigned = field.strip_prefix('-').unwrap_or(field);
    let (int, frac) = match unsigned.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (unsigned, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int) || !frac.map_or(true, all_digits) {
        return Err(invalid());
    }

    let value = f64::from_str(field).map_err(|_| invalid())?;
    if !value.is_finite() {
        return Err(AppError::Protocol(format!("Non-finite coordinate {:?}", field)));
    }
    Ok(value)
}

impl From<DetectionResult> for CoordinateMessage {
    fn from(result: DetectionResult) -> Self {
        match result {
            DetectionResult::Found { x, y } => Self::new(x, y),
            DetectionResult::NotFound => Self::NOT_FOUND,
        }
    }
}

impl fmt::Display for CoordinateMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

impl FromStr for CoordinateMessage {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
