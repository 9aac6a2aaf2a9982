//! Video frames, pacing and the wire codec

pub mod codec;
pub mod format;
pub mod frame;
pub mod pacer;

pub use codec::JpegCodec;
pub use format::{PixelFormat, Resolution, TimeBase};
pub use frame::VideoFrame;
pub use pacer::{FramePacer, VIDEO_CLOCK_RATE, VIDEO_FPS, VIDEO_TIME_BASE};
