//! Frame pacer
//!
//! Hands out presentation timestamps on a fixed 90 kHz clock and suspends the
//! caller until each timestamp is due, so producers never busy-loop.

use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

use super::format::TimeBase;

/// RTP video clock rate
pub const VIDEO_CLOCK_RATE: u32 = 90000;

/// Default frame rate of the synthetic track
pub const VIDEO_FPS: u32 = 30;

/// Time base of every frame the pacer stamps
pub const VIDEO_TIME_BASE: TimeBase = TimeBase::new(1, VIDEO_CLOCK_RATE);

/// Paces frame production against a monotonic clock
#[derive(Debug)]
pub struct FramePacer {
    /// Clock ticks between frames
    step: u64,
    /// Instant of the first timestamp
    start: Option<Instant>,
    /// Last handed out timestamp
    pts: u64,
}

impl FramePacer {
    /// Create a pacer for `fps` frames per second
    pub fn new(fps: u32) -> Self {
        let fps = fps.max(1);
        Self {
            step: (VIDEO_CLOCK_RATE / fps) as u64,
            start: None,
            pts: 0,
        }
    }

    /// Wait for and return the next `(pts, time_base)` pair
    ///
    /// The first call returns `0` immediately; later calls sleep until
    /// `start + pts / clock_rate`. A late caller is not made to catch up by
    /// sleeping less than zero, it simply gets the next timestamp at once.
    pub async fn next_timestamp(&mut self) -> (u64, TimeBase) {
        match self.start {
            None => {
                self.start = Some(Instant::now());
                self.pts = 0;
            }
            Some(start) => {
                self.pts += self.step;
                let offset =
                    Duration::from_nanos(self.pts * 1_000_000_000 / VIDEO_CLOCK_RATE as u64);
                sleep_until(start + offset).await;
            }
        }

        trace!(pts = self.pts, "Frame timestamp due");
        (self.pts, VIDEO_TIME_BASE)
    }
}

impl Default for FramePacer {
    fn default() -> Self {
        Self::new(VIDEO_FPS)
    }
}
