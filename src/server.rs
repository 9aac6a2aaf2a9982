//! Offering peer: owns the ball, streams it and scores the returned coordinates

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ball::BallTrack;
use crate::config::AppConfig;
use crate::coords::{ChannelDispatcher, DispatchStats, ExchangeReport, Reporter};
use crate::error::Result;
use crate::session::{
    wait_until_connected, NegotiationEnd, Negotiator, Role, SessionState, SessionStateMachine,
};
use crate::utils::LogThrottler;
use crate::video::{JpegCodec, Resolution};
use crate::webrtc::{
    resolve_addr, BallVideoTrack, FrameSink, PeerConnection, TcpSignaling, VideoTrackStats,
};

/// Running totals of the coordinate exchanges
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackingStats {
    pub tracked: u64,
    pub not_found: u64,
    pub malformed: u64,
    pub total_error: f64,
    pub max_error: f64,
}

impl TrackingStats {
    pub fn record(&mut self, report: &ExchangeReport) {
        match report {
            ExchangeReport::Tracked { error, .. } => {
                self.tracked += 1;
                self.total_error += error;
                self.max_error = self.max_error.max(*error);
            }
            ExchangeReport::NotFound { .. } => self.not_found += 1,
            ExchangeReport::Malformed { .. } => self.malformed += 1,
        }
    }

    /// Mean tracking error over valid exchanges
    pub fn mean_error(&self) -> Option<f64> {
        (self.tracked > 0).then(|| self.total_error / self.tracked as f64)
    }
}

/// What the server saw over one session
#[derive(Debug, Clone)]
pub struct ServerSummary {
    pub end: NegotiationEnd,
    pub frames_sent: u64,
    pub video: VideoTrackStats,
    pub channel: DispatchStats,
    pub tracking: TrackingStats,
}

/// Render frames into `sink` once the session is connected
///
/// The simulation does not advance before `Connected`. Returns the number of
/// frames written.
pub async fn render_loop(
    mut track: BallTrack,
    sink: Arc<dyn FrameSink>,
    mut state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
) -> u64 {
    let connected = tokio::select! {
        _ = cancel.cancelled() => false,
        connected = wait_until_connected(&mut state) => connected,
    };
    if !connected {
        debug!("Session never connected, no frames rendered");
        return 0;
    }

    info!("Session connected, streaming frames");
    let throttler = LogThrottler::default();
    let mut frames = 0u64;
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = track.recv() => frame,
        };
        if *state.borrow() == SessionState::Closed {
            break;
        }

        if let Err(e) = sink.write_frame(&frame).await {
            if throttler.should_log("write_frame") {
                warn!("Failed to send frame: {}", e);
            }
            continue;
        }
        frames += 1;
    }

    debug!(frames, "Render loop stopped");
    frames
}

/// Run one server session until bye, shutdown or connection failure
pub async fn run(config: AppConfig, cancel: CancellationToken) -> Result<ServerSummary> {
    let session_id = uuid::Uuid::new_v4().to_string();
    info!("Starting server session {}", session_id);

    crate::config::validate(&config)?;
    let ball = BallTrack::new(&config.ball)?;
    let addr = resolve_addr(&config.signaling.addr()).await?;
    let state = SessionStateMachine::new();
    let pc = Arc::new(PeerConnection::new(&config.webrtc, session_id).await?);

    let video = Arc::new(BallVideoTrack::new(
        JpegCodec::new(config.video.jpeg_quality),
        "video0",
        "ball",
    ));
    pc.add_video_track(video.as_track_local()).await?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    pc.create_data_channel(&config.webrtc.data_channel_label, events_tx)
        .await?;
    let state_watcher = pc.watch_state(state.clone());

    let resolution = Resolution::new(config.ball.width, config.ball.height);
    let (report_tx, mut report_rx) = mpsc::unbounded_channel();
    let reporter = Reporter::new(ball.ground_truth(), resolution).with_reports(report_tx);

    let session_cancel = cancel.child_token();
    let dispatcher = ChannelDispatcher::new(Box::new(reporter), state.subscribe());
    let dispatch_task = tokio::spawn(dispatcher.run(events_rx, session_cancel.clone()));

    let sink: Arc<dyn FrameSink> = video.clone();
    let render_task = tokio::spawn(render_loop(
        ball,
        sink,
        state.subscribe(),
        session_cancel.clone(),
    ));

    let stats_task = tokio::spawn(async move {
        let mut stats = TrackingStats::default();
        while let Some(report) = report_rx.recv().await {
            stats.record(&report);
        }
        stats
    });

    let mut negotiator = Negotiator::new(
        Role::Offerer,
        TcpSignaling::listen(addr),
        pc.clone(),
        state.clone(),
        Duration::from_millis(config.signaling.retry_interval_ms),
    );
    let result = negotiator.run(cancel.clone()).await;

    // Tear media and channel down together
    state.close();
    session_cancel.cancel();
    let frames_sent = render_task.await.unwrap_or_default();
    let video_stats = video.stats();
    let channel = dispatch_task.await.unwrap_or_default();
    if let Err(e) = pc.close().await {
        warn!("{}", e);
    }
    let _ = state_watcher.await;
    let tracking = stats_task.await.unwrap_or_default();

    let end = result?;
    let summary = ServerSummary {
        end,
        frames_sent,
        video: video_stats,
        channel,
        tracking,
    };
    info!(
        frames = summary.frames_sent,
        packets = summary.video.packets_sent,
        bytes = summary.video.bytes_sent,
        rtp_errors = summary.video.errors,
        tracked = summary.tracking.tracked,
        not_found = summary.tracking.not_found,
        mean_error = summary.tracking.mean_error().unwrap_or(f64::NAN),
        "Server session ended: {:?}",
        summary.end
    );
    Ok(summary)
}
