use serde::{Deserialize, Serialize};

use crate::webrtc::WebRtcConfig;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Signaling transport settings
    pub signaling: SignalingConfig,
    /// Peer connection settings
    pub webrtc: WebRtcConfig,
    /// Bouncing ball simulation settings
    pub ball: BallConfig,
    /// Video track settings
    pub video: VideoConfig,
    /// Detection pipeline settings
    pub detection: DetectionConfig,
}

/// Signaling transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Host the offerer listens on and the answerer dials
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Pause before retrying after a transient transport error (ms)
    pub retry_interval_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            retry_interval_ms: 500,
        }
    }
}

impl SignalingConfig {
    /// `host:port` string for binding or dialing
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Bouncing ball configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BallConfig {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Ball radius in pixels
    pub radius: u32,
    /// Ball color, RGB
    pub color: [u8; 3],
    /// Per-tick velocity (vx, vy)
    pub velocity: [i32; 2],
    /// Seed for the starting position; random when unset
    pub seed: Option<u64>,
}

impl Default for BallConfig {
    fn default() -> Self {
        Self {
            width: 900,
            height: 600,
            radius: 20,
            color: [128, 255, 128],
            velocity: [15, 15],
            seed: None,
        }
    }
}

/// Video track configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// JPEG quality used on the wire (1-100)
    pub jpeg_quality: u8,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self { jpeg_quality: 90 }
    }
}

/// Detection pipeline configuration
///
/// The search parameters themselves are fixed; only the hand-off is tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Frames buffered for the detector before the oldest is dropped
    pub queue_capacity: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self { queue_capacity: 2 }
    }
}
