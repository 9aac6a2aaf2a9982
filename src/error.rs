use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Signaling failure that ends the session
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Signaling hiccup; the negotiator retries the receive
    #[error("Transient signaling error: {0}")]
    SignalingTransient(String),

    /// A signaling message that could not be decoded; the negotiator skips it
    #[error("Malformed signaling message: {0}")]
    SignalingMalformed(String),

    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    #[error("Video error: {0}")]
    VideoError(String),

    #[error("Detection error: {0}")]
    Detection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),
}

impl AppError {
    /// Whether the negotiator should retry after this error
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::SignalingTransient(_))
    }
}

impl From<webrtc::Error> for AppError {
    fn from(e: webrtc::Error) -> Self {
        AppError::WebRtcError(e.to_string())
    }
}

impl From<image::ImageError> for AppError {
    fn from(e: image::ImageError) -> Self {
        AppError::VideoError(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
