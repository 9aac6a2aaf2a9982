//! Coordinate channel dispatch
//!
//! Data channel callbacks run on the WebRTC stack's tasks. They only forward
//! [`ChannelEvent`]s; the dispatcher consumes them on the session side and
//! calls the registered handler, one event at a time.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handler::CoordinateHandler;
use crate::error::Result;
use crate::session::{wait_until_connected, SessionState};

/// Outbound half of a reliable, ordered text channel
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send_text(&self, text: String) -> Result<()>;
}

/// Lifecycle events of the coordinate channel
pub enum ChannelEvent {
    /// Channel is open; replies go to this sender
    Open(Arc<dyn ChannelSender>),
    /// Inbound text message
    Message(String),
    /// Channel closed by either side
    Closed,
}

impl std::fmt::Debug for ChannelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelEvent::Open(_) => write!(f, "Open"),
            ChannelEvent::Message(text) => write!(f, "Message({:?})", text),
            ChannelEvent::Closed => write!(f, "Closed"),
        }
    }
}

/// Counters returned when the dispatcher stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: u64,
    pub sent: u64,
    pub send_errors: u64,
}

/// Feeds channel events to one handler
pub struct ChannelDispatcher {
    handler: Box<dyn CoordinateHandler>,
    sender: Option<Arc<dyn ChannelSender>>,
    state: watch::Receiver<SessionState>,
    stats: DispatchStats,
}

impl ChannelDispatcher {
    pub fn new(handler: Box<dyn CoordinateHandler>, state: watch::Receiver<SessionState>) -> Self {
        Self {
            handler,
            sender: None,
            state,
            stats: DispatchStats::default(),
        }
    }

    /// Process events until the channel closes, the session ends or `cancel` fires
    ///
    /// Nothing is handled before the session reaches `Connected`; events that
    /// arrive earlier wait in the queue.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
        cancel: CancellationToken,
    ) -> DispatchStats {
        let mut state = self.state.clone();
        let connected = tokio::select! {
            _ = cancel.cancelled() => false,
            connected = wait_until_connected(&mut state) => connected,
        };
        if !connected {
            debug!("Session ended before connecting, coordinate channel idle");
            return self.stats;
        }

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            if !self.dispatch(event).await {
                break;
            }
        }

        debug!(
            received = self.stats.received,
            sent = self.stats.sent,
            "Coordinate channel dispatcher stopped"
        );
        self.stats
    }

    /// Handle one event; returns `false` once the channel is closed
    pub async fn dispatch(&mut self, event: ChannelEvent) -> bool {
        if *self.state.borrow() != SessionState::Connected {
            debug!("Dropping {:?}: session not connected", event);
            return !matches!(event, ChannelEvent::Closed);
        }

        match event {
            ChannelEvent::Open(sender) => {
                info!("Coordinate channel open");
                self.sender = Some(sender);
                let reply = self.handler.on_open();
                self.reply(reply).await;
                true
            }
            ChannelEvent::Message(text) => {
                self.stats.received += 1;
                let reply = self.handler.on_message(&text);
                self.reply(reply).await;
                true
            }
            ChannelEvent::Closed => {
                info!("Coordinate channel closed");
                self.sender = None;
                false
            }
        }
    }

    async fn reply(&mut self, reply: Option<String>) {
        let Some(text) = reply else {
            return;
        };
        let Some(sender) = &self.sender else {
            warn!("No open coordinate channel for reply {:?}", text);
            return;
        };

        match sender.send_text(text).await {
            Ok(()) => self.stats.sent += 1,
            Err(e) => {
                self.stats.send_errors += 1;
                warn!("Failed to send on coordinate channel: {}", e);
            }
        }
    }
}
