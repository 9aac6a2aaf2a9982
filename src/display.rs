//! Display sinks for received frames
//!
//! Display is best effort: the client logs failures and carries on, so a
//! broken sink never affects detection or the coordinate channel.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::ImageFormat;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::video::VideoFrame;

/// Receives every decoded frame on the client
#[async_trait]
pub trait DisplaySink: Send {
    async fn show(&mut self, frame: &VideoFrame) -> Result<()>;

    fn close(&mut self) {}
}

/// Discards frames
#[derive(Debug, Default)]
pub struct NullDisplay;

#[async_trait]
impl DisplaySink for NullDisplay {
    async fn show(&mut self, _frame: &VideoFrame) -> Result<()> {
        Ok(())
    }
}

/// Keeps a PNG snapshot of the latest frame on disk
///
/// Writes the first frame and then every `every`th frame. The file is
/// replaced atomically so readers never see a partial image. Encoding and
/// file I/O run on the blocking pool.
pub struct SnapshotDisplay {
    path: PathBuf,
    every: u64,
    seen: u64,
    written: u64,
}

impl SnapshotDisplay {
    pub fn new(path: impl Into<PathBuf>, every: u64) -> Self {
        Self {
            path: path.into(),
            every: every.max(1),
            seen: 0,
            written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of snapshots written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    async fn write(&self, frame: &VideoFrame) -> Result<()> {
        let frame = frame.clone();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_png(&frame, &path))
            .await
            .map_err(|e| AppError::VideoError(format!("Snapshot task failed: {}", e)))?
    }
}

fn write_png(frame: &VideoFrame, path: &Path) -> Result<()> {
    let image = frame.to_rgb_image()?;
    let tmp = path.with_extension("png.tmp");
    image
        .save_with_format(&tmp, ImageFormat::Png)
        .map_err(|e| AppError::VideoError(format!("Failed to write {}: {}", tmp.display(), e)))?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl DisplaySink for SnapshotDisplay {
    async fn show(&mut self, frame: &VideoFrame) -> Result<()> {
        let index = self.seen;
        self.seen += 1;
        if index % self.every != 0 {
            return Ok(());
        }

        self.write(frame).await?;
        self.written += 1;
        if self.written == 1 {
            info!("Writing frame snapshots to {}", self.path.display());
        }
        debug!(pts = frame.pts, "Snapshot updated");
        Ok(())
    }

    fn close(&mut self) {
        debug!(
            frames = self.seen,
            snapshots = self.written,
            "Snapshot display closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::VIDEO_TIME_BASE;
    use image::{Rgb, RgbImage};

    fn frame(pts: u64) -> VideoFrame {
        VideoFrame::from_rgb(RgbImage::from_pixel(8, 6, Rgb([1, 1, 1])), pts, VIDEO_TIME_BASE)
    }

    #[tokio::test]
    async fn test_snapshot_writes_every_nth_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.png");
        let mut display = SnapshotDisplay::new(&path, 3);

        for pts in 0..7 {
            display.show(&frame(pts * 3000)).await.unwrap();
        }
        // Frames 0, 3 and 6
        assert_eq!(display.written(), 3);

        let saved = image::open(&path).unwrap().to_rgb8();
        assert_eq!(saved.dimensions(), (8, 6));
        assert_eq!(saved.get_pixel(0, 0).0, [1, 1, 1]);
        assert!(!path.with_extension("png.tmp").exists());
        display.close();
    }

    #[tokio::test]
    async fn test_snapshot_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut display = SnapshotDisplay::new(dir.path().join("missing/latest.png"), 1);
        assert!(display.show(&frame(0)).await.is_err());
    }

    #[tokio::test]
    async fn test_null_display_accepts_anything() {
        let mut display = NullDisplay;
        assert!(display.show(&frame(0)).await.is_ok());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_snapshot_write_leaves_runtime_free() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let mut display = SnapshotDisplay::new(dir.path().join("latest.png"), 1);
        let big = VideoFrame::from_rgb(
            RgbImage::from_fn(900, 600, |x, y| Rgb([x as u8, y as u8, 9])),
            0,
            VIDEO_TIME_BASE,
        );

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        tokio::spawn(async move { flag.store(true, Ordering::SeqCst) });

        display.show(&big).await.unwrap();
        // The other task got the runtime thread while the PNG was written
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(display.written(), 1);
    }
}
