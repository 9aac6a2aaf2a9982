use tokio::sync::watch;
use tracing::trace;

use super::{BallPosition, BallSimulator};
use crate::config::BallConfig;
use crate::error::Result;
use crate::video::{FramePacer, VideoFrame};

/// Pull-based source of ball frames
///
/// Each `recv` waits for the pacer, advances the simulation one tick, renders
/// and publishes the new ground-truth position.
pub struct BallTrack {
    simulator: BallSimulator,
    pacer: FramePacer,
    position_tx: watch::Sender<BallPosition>,
}

impl BallTrack {
    pub fn new(config: &BallConfig) -> Result<Self> {
        Ok(Self::from_simulator(
            BallSimulator::new(config)?,
            FramePacer::default(),
        ))
    }

    pub fn from_simulator(simulator: BallSimulator, pacer: FramePacer) -> Self {
        let (position_tx, _) = watch::channel(simulator.position());
        Self {
            simulator,
            pacer,
            position_tx,
        }
    }

    /// Subscribe to the ground-truth position
    pub fn ground_truth(&self) -> watch::Receiver<BallPosition> {
        self.position_tx.subscribe()
    }

    /// Current ground-truth position
    pub fn position(&self) -> BallPosition {
        self.simulator.position()
    }

    /// Produce the next frame
    pub async fn recv(&mut self) -> VideoFrame {
        let (pts, time_base) = self.pacer.next_timestamp().await;

        let bounce = self.simulator.tick();
        if bounce.x || bounce.y {
            trace!(tick = self.simulator.ticks(), ?bounce, "Ball bounced");
        }

        let frame = VideoFrame::from_rgb(self.simulator.render(), pts, time_base);
        self.position_tx.send_replace(self.simulator.position());
        frame
    }
}
