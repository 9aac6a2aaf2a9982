//! Ball detection
//!
//! Frames are handed to a dedicated detector thread through a bounded queue.
//! The thread publishes each result into a [`DetectionCell`], which only ever
//! holds the most recent outcome: a missed frame turns into `NotFound`, it
//! never keeps echoing an older position.

pub mod hough;
pub mod pipeline;
pub mod worker;

use std::sync::Arc;

use arc_swap::ArcSwap;

pub use pipeline::BallDetector;
pub use worker::{DetectionWorker, FrameQueue, WorkerStats};

/// Outcome of one detection pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectionResult {
    Found { x: f64, y: f64 },
    NotFound,
}

impl DetectionResult {
    pub fn is_found(&self) -> bool {
        matches!(self, DetectionResult::Found { .. })
    }
}

/// Latest detection, shared between the detector thread and the session loop
///
/// The pair is swapped as one record, so readers never see an x from one
/// pass combined with a y from another.
#[derive(Debug, Clone)]
pub struct DetectionCell {
    inner: Arc<ArcSwap<DetectionResult>>,
}

impl DetectionCell {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(DetectionResult::NotFound)),
        }
    }

    /// Replace the current result
    pub fn publish(&self, result: DetectionResult) {
        self.inner.store(Arc::new(result));
    }

    /// Most recent result
    pub fn latest(&self) -> DetectionResult {
        **self.inner.load()
    }
}

impl Default for DetectionCell {
    fn default() -> Self {
        Self::new()
    }
}
