//! Answering peer: receives the stream, detects the ball and answers queries

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::track::track_remote::TrackRemote;

use crate::config::AppConfig;
use crate::coords::{ChannelDispatcher, DispatchStats, Requester};
use crate::detection::{DetectionCell, DetectionWorker, FrameQueue, WorkerStats};
use crate::display::DisplaySink;
use crate::error::Result;
use crate::session::{
    wait_until_connected, NegotiationEnd, Negotiator, Role, SessionState, SessionStateMachine,
};
use crate::utils::LogThrottler;
use crate::video::JpegCodec;
use crate::webrtc::{resolve_addr, FrameSource, PeerConnection, RemoteFrameReader, TcpSignaling};

/// What the client saw over one session
#[derive(Debug, Clone)]
pub struct ClientSummary {
    pub end: NegotiationEnd,
    pub frames_received: u64,
    pub channel: DispatchStats,
    pub detection: WorkerStats,
}

/// Pump received frames to the display and the detector queue
///
/// Nothing is consumed before the session is `Connected`. Display failures
/// are logged and never stop the loop. Returns the number of frames received.
pub async fn receive_loop<S: FrameSource>(
    mut source: S,
    mut display: Box<dyn DisplaySink>,
    queue: FrameQueue,
    mut state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
) -> u64 {
    let connected = tokio::select! {
        _ = cancel.cancelled() => false,
        connected = wait_until_connected(&mut state) => connected,
    };
    if !connected {
        display.close();
        return 0;
    }

    let throttler = LogThrottler::default();
    let mut frames = 0u64;
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = source.next_frame() => frame,
        };
        let Some(frame) = frame else {
            debug!("Remote track ended");
            break;
        };
        frames += 1;

        if let Err(e) = display.show(&frame).await {
            if throttler.should_log("display") {
                warn!("Display failed: {}", e);
            }
        }
        if !queue.push(frame) {
            break;
        }
    }

    display.close();
    debug!(frames, dropped = queue.dropped(), "Receive loop stopped");
    frames
}

/// Wait for the remote video track and run [`receive_loop`] on it
async fn media_task(
    mut tracks: mpsc::UnboundedReceiver<Arc<TrackRemote>>,
    codec: JpegCodec,
    display: Box<dyn DisplaySink>,
    queue: FrameQueue,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
) -> u64 {
    let track = tokio::select! {
        _ = cancel.cancelled() => None,
        track = tracks.recv() => track,
    };
    let Some(track) = track else {
        return 0;
    };

    receive_loop(
        RemoteFrameReader::new(track, codec),
        display,
        queue,
        state,
        cancel,
    )
    .await
}

/// Run one client session until bye, shutdown or connection failure
pub async fn run(
    config: AppConfig,
    display: Box<dyn DisplaySink>,
    cancel: CancellationToken,
) -> Result<ClientSummary> {
    let session_id = uuid::Uuid::new_v4().to_string();
    info!("Starting client session {}", session_id);

    crate::config::validate(&config)?;
    let addr = resolve_addr(&config.signaling.addr()).await?;
    let state = SessionStateMachine::new();
    let worker = DetectionWorker::spawn(config.detection.queue_capacity, DetectionCell::new())?;
    let pc = Arc::new(PeerConnection::new(&config.webrtc, session_id).await?);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    pc.accept_data_channels(&config.webrtc.data_channel_label, events_tx);
    let (track_tx, track_rx) = mpsc::unbounded_channel();
    pc.on_track(track_tx);
    let state_watcher = pc.watch_state(state.clone());

    let session_cancel = cancel.child_token();
    let requester = Requester::new(worker.cell());
    let dispatcher = ChannelDispatcher::new(Box::new(requester), state.subscribe());
    let dispatch_task = tokio::spawn(dispatcher.run(events_rx, session_cancel.clone()));

    let media = tokio::spawn(media_task(
        track_rx,
        JpegCodec::new(config.video.jpeg_quality),
        display,
        worker.queue(),
        state.subscribe(),
        session_cancel.clone(),
    ));

    let mut negotiator = Negotiator::new(
        Role::Answerer,
        TcpSignaling::dial(addr),
        pc.clone(),
        state.clone(),
        Duration::from_millis(config.signaling.retry_interval_ms),
    );
    let result = negotiator.run(cancel.clone()).await;

    state.close();
    session_cancel.cancel();
    let frames_received = media.await.unwrap_or_default();
    let channel = dispatch_task.await.unwrap_or_default();
    let detection = worker.shutdown();
    if let Err(e) = pc.close().await {
        warn!("{}", e);
    }
    let _ = state_watcher.await;

    let end = result?;
    let summary = ClientSummary {
        end,
        frames_received,
        channel,
        detection,
    };
    info!(
        frames = summary.frames_received,
        replies = summary.channel.sent,
        found = summary.detection.found,
        not_found = summary.detection.not_found,
        "Client session ended: {:?}",
        summary.end
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ball::BallTrack;
    use crate::config::BallConfig;
    use crate::detection::DetectionResult;
    use crate::error::AppError;
    use crate::video::VideoFrame;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct ScriptedSource {
        frames: VecDeque<VideoFrame>,
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn next_frame(&mut self) -> Option<VideoFrame> {
            self.frames.pop_front()
        }
    }

    struct FlakyDisplay {
        shown: Arc<Mutex<u64>>,
    }

    #[async_trait]
    impl DisplaySink for FlakyDisplay {
        async fn show(&mut self, _frame: &VideoFrame) -> Result<()> {
            *self.shown.lock() += 1;
            Err(AppError::VideoError("no window".into()))
        }
    }

    async fn ball_frames(n: usize) -> VecDeque<VideoFrame> {
        let mut track = BallTrack::new(&BallConfig {
            seed: Some(9),
            ..Default::default()
        })
        .unwrap();
        let mut frames = VecDeque::new();
        for _ in 0..n {
            frames.push_back(track.recv().await);
        }
        frames
    }

    fn connected_state() -> SessionStateMachine {
        let state = SessionStateMachine::new();
        state.transition(SessionState::AwaitingOffer).unwrap();
        state.transition(SessionState::AnswerExchanged).unwrap();
        state.transition(SessionState::Connected).unwrap();
        state
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_failure_does_not_stop_detection() {
        let state = connected_state();
        let cell = DetectionCell::new();
        let worker = DetectionWorker::spawn(8, cell.clone()).unwrap();
        let shown = Arc::new(Mutex::new(0));

        let source = ScriptedSource {
            frames: ball_frames(3).await,
        };
        let display = Box::new(FlakyDisplay {
            shown: shown.clone(),
        });
        let frames = receive_loop(
            source,
            display,
            worker.queue(),
            state.subscribe(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(frames, 3);
        assert_eq!(*shown.lock(), 3);

        // The detector thread runs on wall-clock time
        for _ in 0..1000 {
            if cell.latest().is_found() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(matches!(cell.latest(), DetectionResult::Found { .. }));

        let stats = worker.shutdown();
        assert!(stats.found > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_consumed_before_connected() {
        let state = SessionStateMachine::new();
        state.transition(SessionState::AwaitingOffer).unwrap();
        let queue = FrameQueue::new(2);
        let shown = Arc::new(Mutex::new(0));

        let source = ScriptedSource {
            frames: ball_frames(2).await,
        };
        let display = Box::new(FlakyDisplay {
            shown: shown.clone(),
        });
        let task = tokio::spawn(receive_loop(
            source,
            display,
            queue.clone(),
            state.subscribe(),
            CancellationToken::new(),
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(queue.is_empty());
        assert_eq!(*shown.lock(), 0);

        state.close();
        assert_eq!(task.await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_queue_stops_loop() {
        let state = connected_state();
        let queue = FrameQueue::new(2);
        queue.close();

        let source = ScriptedSource {
            frames: ball_frames(4).await,
        };
        let frames = receive_loop(
            source,
            Box::new(crate::display::NullDisplay),
            queue,
            state.subscribe(),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(frames, 1);
    }
}
