//! Role handlers for the coordinate channel

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use super::protocol::{CoordinateMessage, ACK, GREETING};
use crate::ball::BallPosition;
use crate::detection::DetectionCell;
use crate::video::Resolution;

/// Handler registered against the channel's open and message events
///
/// Returned strings are sent back on the same channel.
pub trait CoordinateHandler: Send {
    fn on_open(&mut self) -> Option<String> {
        None
    }

    fn on_message(&mut self, text: &str) -> Option<String>;
}

/// Detector side: answers every inbound message with the latest detection
pub struct Requester {
    cell: DetectionCell,
}

impl Requester {
    pub fn new(cell: DetectionCell) -> Self {
        Self { cell }
    }
}

impl CoordinateHandler for Requester {
    fn on_message(&mut self, _text: &str) -> Option<String> {
        Some(CoordinateMessage::from(self.cell.latest()).encode())
    }
}

/// Outcome of one coordinate exchange on the reporter side
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeReport {
    /// Valid pair compared against ground truth
    Tracked {
        received: CoordinateMessage,
        truth: BallPosition,
        error: f64,
    },
    /// Sentinel or out-of-frame pair
    NotFound { received: CoordinateMessage },
    /// Text that is not a coordinate pair
    Malformed { text: String },
}

/// Simulator side: scores received pairs against the ball's true position
pub struct Reporter {
    truth: watch::Receiver<BallPosition>,
    resolution: Resolution,
    reports: Option<mpsc::UnboundedSender<ExchangeReport>>,
}

impl Reporter {
    pub fn new(truth: watch::Receiver<BallPosition>, resolution: Resolution) -> Self {
        Self {
            truth,
            resolution,
            reports: None,
        }
    }

    /// Also forward every report to `tx`
    pub fn with_reports(mut self, tx: mpsc::UnboundedSender<ExchangeReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    /// Classify one inbound message
    pub fn evaluate(&self, text: &str) -> ExchangeReport {
        let received = match CoordinateMessage::parse(text) {
            Ok(msg) => msg,
            Err(_) => {
                return ExchangeReport::Malformed {
                    text: text.to_string(),
                }
            }
        };

        if !received.is_valid_for(self.resolution) {
            return ExchangeReport::NotFound { received };
        }

        let truth = *self.truth.borrow();
        ExchangeReport::Tracked {
            received,
            truth,
            error: truth.distance_to(received.x, received.y),
        }
    }
}

impl CoordinateHandler for Reporter {
    fn on_open(&mut self) -> Option<String> {
        Some(GREETING.to_string())
    }

    fn on_message(&mut self, text: &str) -> Option<String> {
        let report = self.evaluate(text);

        match &report {
            ExchangeReport::Tracked {
                received,
                truth,
                error,
            } => {
                info!(
                    client_x = received.x,
                    client_y = received.y,
                    server_x = truth.x,
                    server_y = truth.y,
                    error = *error,
                    "Tracking error {:.3}",
                    error
                );
            }
            ExchangeReport::NotFound { .. } => {
                info!("Circle not found, skipping frame");
            }
            ExchangeReport::Malformed { text } => {
                warn!("Ignoring malformed coordinate message {:?}", text);
            }
        }

        if let Some(tx) = &self.reports {
            let _ = tx.send(report);
        }

        // The exchange continues even after garbage input
        Some(ACK.to_string())
    }
}
