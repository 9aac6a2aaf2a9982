//! WebRTC configuration

use serde::{Deserialize, Serialize};

/// WebRTC configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// Label of the coordinate data channel
    pub data_channel_label: String,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            // Host candidates are enough for peers on one machine or LAN
            stun_servers: vec![],
            data_channel_label: "coordinates".to_string(),
        }
    }
}
