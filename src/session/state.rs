//! Session state machine
//!
//! ```text
//! offerer:   New -> OfferSent     -> AnswerExchanged -> Connected -> Closed
//! answerer:  New -> AwaitingOffer -> AnswerExchanged -> Connected -> Closed
//! ```
//!
//! Any state may move to `Closed`. `Closed` is terminal.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    New,
    OfferSent,
    AwaitingOffer,
    AnswerExchanged,
    Connected,
    Closed,
}

impl SessionState {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (New, OfferSent)
                | (New, AwaitingOffer)
                | (OfferSent, AnswerExchanged)
                | (AwaitingOffer, AnswerExchanged)
                | (AnswerExchanged, Connected)
        ) || (next == Closed && self != Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::New => "new",
            SessionState::OfferSent => "offer-sent",
            SessionState::AwaitingOffer => "awaiting-offer",
            SessionState::AnswerExchanged => "answer-exchanged",
            SessionState::Connected => "connected",
            SessionState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// Shared handle to the session state
///
/// Clones share one state; observers subscribe to a watch channel.
#[derive(Clone)]
pub struct SessionStateMachine {
    tx: Arc<watch::Sender<SessionState>>,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::New);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition(&self, next: SessionState) -> Result<()> {
        let mut result = Ok(());
        self.tx.send_if_modified(|state| {
            if state.can_transition(next) {
                info!("Session state: {} -> {}", state, next);
                *state = next;
                true
            } else {
                result = Err(AppError::InvalidState(format!("{} -> {}", state, next)));
                false
            }
        });
        result
    }

    /// Move to `Closed`; no-op if already closed
    pub fn close(&self) {
        let _ = self.transition(SessionState::Closed);
    }

    pub fn is_closed(&self) -> bool {
        self.current() == SessionState::Closed
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait until the session is `Connected` (`true`) or `Closed` (`false`)
pub async fn wait_until_connected(rx: &mut watch::Receiver<SessionState>) -> bool {
    loop {
        match *rx.borrow_and_update() {
            SessionState::Connected => return true,
            SessionState::Closed => return false,
            _ => {}
        }
        if rx.changed().await.is_err() {
            return false;
        }
    }
}

/// Wait until the session is `Closed`
pub async fn wait_until_closed(rx: &mut watch::Receiver<SessionState>) {
    loop {
        if *rx.borrow_and_update() == SessionState::Closed {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
