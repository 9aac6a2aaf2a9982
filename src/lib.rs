//! ball-rtc - bouncing-ball tracking over WebRTC
//!
//! One peer renders a bouncing ball and streams it; the other detects the
//! ball in the received frames and reports its position back over a data
//! channel, where it is scored against the true position.

pub mod ball;
pub mod client;
pub mod config;
pub mod coords;
pub mod detection;
pub mod display;
pub mod error;
pub mod server;
pub mod session;
pub mod utils;
pub mod video;
pub mod webrtc;

pub use error::{AppError, Result};
