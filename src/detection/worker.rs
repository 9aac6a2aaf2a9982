//! Detector thread and its input queue
//!
//! Detection is CPU heavy, so it runs on its own OS thread rather than on the
//! async runtime. The queue between the session loop and that thread is
//! bounded: when the detector falls behind, the oldest pending frame is
//! dropped so the detector always works on recent pictures.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use super::{BallDetector, DetectionCell, DetectionResult};
use crate::error::{AppError, Result};
use crate::utils::LogThrottler;
use crate::video::VideoFrame;

struct QueueState {
    frames: VecDeque<VideoFrame>,
    closed: bool,
    dropped: u64,
}

struct QueueInner {
    state: Mutex<QueueState>,
    ready: Condvar,
    capacity: usize,
}

/// Bounded single-producer/single-consumer frame queue with drop-oldest
#[derive(Clone)]
pub struct FrameQueue {
    inner: Arc<QueueInner>,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    frames: VecDeque::with_capacity(capacity.max(1)),
                    closed: false,
                    dropped: 0,
                }),
                ready: Condvar::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Enqueue a frame, evicting the oldest one when full
    ///
    /// Returns `false` once the queue is closed.
    pub fn push(&self, frame: VideoFrame) -> bool {
        let mut state = self.inner.state.lock();
        if state.closed {
            return false;
        }
        if state.frames.len() >= self.inner.capacity {
            state.frames.pop_front();
            state.dropped += 1;
        }
        state.frames.push_back(frame);
        drop(state);

        self.inner.ready.notify_one();
        true
    }

    /// Block until a frame is available; `None` after close
    pub fn pop(&self) -> Option<VideoFrame> {
        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(frame) = state.frames.pop_front() {
                return Some(frame);
            }
            self.inner.ready.wait(&mut state);
        }
    }

    /// Close the queue and wake the consumer; pending frames are discarded
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        state.frames.clear();
        drop(state);

        self.inner.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames evicted because the consumer was behind
    pub fn dropped(&self) -> u64 {
        self.inner.state.lock().dropped
    }
}

/// Counters returned when the detector thread exits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub found: u64,
    pub not_found: u64,
    pub errors: u64,
    pub dropped: u64,
}

/// Owns the detector thread
pub struct DetectionWorker {
    queue: FrameQueue,
    cell: DetectionCell,
    handle: Option<JoinHandle<WorkerStats>>,
}

impl DetectionWorker {
    /// Spawn the detector thread
    pub fn spawn(queue_capacity: usize, cell: DetectionCell) -> Result<Self> {
        let queue = FrameQueue::new(queue_capacity);
        let thread_queue = queue.clone();
        let thread_cell = cell.clone();

        let handle = thread::Builder::new()
            .name("ball-detector".to_string())
            .spawn(move || run(thread_queue, thread_cell))
            .map_err(|e| AppError::Detection(format!("Failed to spawn detector: {}", e)))?;

        info!("Detection worker started (queue capacity {})", queue_capacity);

        Ok(Self {
            queue,
            cell,
            handle: Some(handle),
        })
    }

    /// Hand a frame to the detector; `false` after shutdown
    pub fn submit(&self, frame: VideoFrame) -> bool {
        self.queue.push(frame)
    }

    /// Producer handle for the frame queue
    pub fn queue(&self) -> FrameQueue {
        self.queue.clone()
    }

    /// Result cell the worker publishes into
    pub fn cell(&self) -> DetectionCell {
        self.cell.clone()
    }

    /// Stop accepting frames and join the thread
    pub fn shutdown(mut self) -> WorkerStats {
        self.stop()
    }

    fn stop(&mut self) -> WorkerStats {
        self.queue.close();
        let Some(handle) = self.handle.take() else {
            return WorkerStats::default();
        };

        match handle.join() {
            Ok(stats) => {
                info!(
                    processed = stats.processed,
                    found = stats.found,
                    not_found = stats.not_found,
                    dropped = stats.dropped,
                    "Detection worker stopped"
                );
                stats
            }
            Err(_) => {
                warn!("Detection worker panicked");
                WorkerStats::default()
            }
        }
    }
}

impl Drop for DetectionWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

fn run(queue: FrameQueue, cell: DetectionCell) -> WorkerStats {
    let detector = BallDetector::new();
    let throttler = LogThrottler::new(Duration::from_secs(5));
    let mut stats = WorkerStats::default();

    while let Some(frame) = queue.pop() {
        let result = match detector.detect(&frame) {
            Ok(result) => result,
            Err(e) => {
                stats.errors += 1;
                if throttler.should_log("detect") {
                    warn!("Detection failed on frame pts={}: {}", frame.pts, e);
                }
                DetectionResult::NotFound
            }
        };

        match result {
            DetectionResult::Found { .. } => stats.found += 1,
            DetectionResult::NotFound => stats.not_found += 1,
        }
        stats.processed += 1;
        cell.publish(result);

        debug!(pts = frame.pts, ?result, "Frame processed");
    }

    stats.dropped = queue.dropped();
    stats
}
