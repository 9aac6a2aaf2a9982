//! Offer/answer negotiation over a signaling transport

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{wait_until_closed, SessionState, SessionStateMachine};
use crate::error::{AppError, Result};
use crate::webrtc::signaling::{SdpKind, SessionDescription, SignalingMessage, SignalingTransport};

/// Which side of the handshake this peer plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends the first description
    Offerer,
    /// Waits for a description and replies
    Answerer,
}

impl Role {
    fn expected_remote(self) -> SdpKind {
        match self {
            Role::Offerer => SdpKind::Answer,
            Role::Answerer => SdpKind::Offer,
        }
    }
}

/// The local peer connection as seen by the negotiator
///
/// `create_offer` and `create_answer` also install the result as the local
/// description.
#[async_trait]
pub trait SessionEndpoint: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
}

/// How a negotiation loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationEnd {
    /// The peer sent `bye` or hung up
    RemoteBye,
    /// Local shutdown was requested
    LocalShutdown,
    /// The session closed underneath the negotiator
    SessionClosed,
}

enum Step {
    Received(Result<SignalingMessage>),
    Cancelled,
    Closed,
}

/// Drives one session from `New` to `Closed`
pub struct Negotiator<T, E: ?Sized> {
    role: Role,
    transport: T,
    endpoint: Arc<E>,
    state: SessionStateMachine,
    retry_interval: Duration,
    local_sent: bool,
}

impl<T, E> Negotiator<T, E>
where
    T: SignalingTransport,
    E: SessionEndpoint + ?Sized,
{
    pub fn new(
        role: Role,
        transport: T,
        endpoint: Arc<E>,
        state: SessionStateMachine,
        retry_interval: Duration,
    ) -> Self {
        Self {
            role,
            transport,
            endpoint,
            state,
            retry_interval,
            local_sent: false,
        }
    }

    pub fn state(&self) -> &SessionStateMachine {
        &self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run the handshake and then the receive loop until the session ends
    ///
    /// There is no timeout: an answerer that is never offered anything stays
    /// in `AwaitingOffer` until cancelled.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<NegotiationEnd> {
        let result = self.negotiate(&cancel).await;
        if result.is_err() {
            let _ = self.transport.close().await;
            self.state.close();
        }
        result
    }

    async fn negotiate(&mut self, cancel: &CancellationToken) -> Result<NegotiationEnd> {
        match self.role {
            Role::Offerer => {
                if !self.connect(cancel).await? {
                    return self.shutdown(NegotiationEnd::LocalShutdown).await;
                }
                let offer = self.endpoint.create_offer().await?;
                if !self.send_retrying(offer.into(), cancel).await? {
                    return self.shutdown(NegotiationEnd::LocalShutdown).await;
                }
                self.local_sent = true;
                self.state.transition(SessionState::OfferSent)?;
            }
            Role::Answerer => {
                self.state.transition(SessionState::AwaitingOffer)?;
                if !self.connect(cancel).await? {
                    return self.shutdown(NegotiationEnd::LocalShutdown).await;
                }
            }
        }

        let mut state_rx = self.state.subscribe();
        loop {
            let step = tokio::select! {
                _ = cancel.cancelled() => Step::Cancelled,
                _ = wait_until_closed(&mut state_rx) => Step::Closed,
                msg = self.transport.receive() => Step::Received(msg),
            };

            match step {
                Step::Cancelled => return self.shutdown(NegotiationEnd::LocalShutdown).await,
                Step::Closed => return self.shutdown(NegotiationEnd::SessionClosed).await,
                Step::Received(Ok(SignalingMessage::Bye)) => {
                    info!("Remote peer said bye");
                    self.state.close();
                    let _ = self.transport.close().await;
                    return Ok(NegotiationEnd::RemoteBye);
                }
                Step::Received(Ok(msg)) => {
                    if let Some(desc) = msg.into_description() {
                        if !self.handle_description(desc, cancel).await? {
                            return self.shutdown(NegotiationEnd::LocalShutdown).await;
                        }
                    }
                }
                Step::Received(Err(AppError::SignalingMalformed(reason))) => {
                    warn!("Skipping signaling message: {}", reason);
                }
                Step::Received(Err(e)) if e.is_transient() => {
                    warn!("Signaling receive failed, retrying: {}", e);
                    if !self.pause(cancel).await {
                        return self.shutdown(NegotiationEnd::LocalShutdown).await;
                    }
                }
                Step::Received(Err(e)) => return Err(e),
            }
        }
    }

    /// Install a remote description and answer it if needed
    ///
    /// Returns `false` if cancelled while sending.
    async fn handle_description(
        &mut self,
        desc: SessionDescription,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if desc.kind != self.role.expected_remote() {
            warn!("Ignoring unexpected {:?} description", desc.kind);
            return Ok(true);
        }
        let pending = match self.role {
            Role::Offerer => self.state.current() == SessionState::OfferSent,
            Role::Answerer => !self.local_sent,
        };
        if !pending {
            debug!("Ignoring repeated {:?} description", desc.kind);
            return Ok(true);
        }

        if let Err(e) = self.endpoint.set_remote_description(desc).await {
            warn!("Rejected remote description, waiting for another: {}", e);
            return Ok(true);
        }

        if self.local_sent {
            self.state.transition(SessionState::AnswerExchanged)?;
            return Ok(true);
        }

        let answer = self.endpoint.create_answer().await?;
        self.state.transition(SessionState::AnswerExchanged)?;
        if !self.send_retrying(answer.into(), cancel).await? {
            return Ok(false);
        }
        self.local_sent = true;
        Ok(true)
    }

    /// Connect the transport, retrying transient failures
    async fn connect(&mut self, cancel: &CancellationToken) -> Result<bool> {
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                result = self.transport.connect() => result,
            };
            match result {
                Ok(()) => return Ok(true),
                Err(e) if e.is_transient() => {
                    debug!("Signaling connect failed, retrying: {}", e);
                    if !self.pause(cancel).await {
                        return Ok(false);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_retrying(
        &mut self,
        message: SignalingMessage,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        loop {
            match self.transport.send(&message).await {
                Ok(()) => return Ok(true),
                Err(e) if e.is_transient() => {
                    warn!("Signaling send failed, retrying: {}", e);
                    if !self.pause(cancel).await || !self.connect(cancel).await? {
                        return Ok(false);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sleep for the retry interval; `false` if cancelled meanwhile
    async fn pause(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.retry_interval) => true,
        }
    }

    async fn shutdown(&mut self, end: NegotiationEnd) -> Result<NegotiationEnd> {
        info!("Ending session: {:?}", end);
        if let Err(e) = self.transport.send(&SignalingMessage::Bye).await {
            debug!("Could not send bye: {}", e);
        }
        let _ = self.transport.close().await;
        self.state.close();
        Ok(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;
    use tokio_test::{assert_pending, task};

    struct FakeTransport {
        incoming: mpsc::UnboundedReceiver<Result<SignalingMessage>>,
        sent: Arc<Mutex<Vec<SignalingMessage>>>,
        connects: usize,
        failing_connects: usize,
    }

    struct TransportHandle {
        incoming: mpsc::UnboundedSender<Result<SignalingMessage>>,
        sent: Arc<Mutex<Vec<SignalingMessage>>>,
    }

    fn fake_transport() -> (FakeTransport, TransportHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            FakeTransport {
                incoming: rx,
                sent: sent.clone(),
                connects: 0,
                failing_connects: 0,
            },
            TransportHandle { incoming: tx, sent },
        )
    }

    #[async_trait]
    impl SignalingTransport for FakeTransport {
        async fn connect(&mut self) -> Result<()> {
            self.connects += 1;
            if self.connects <= self.failing_connects {
                return Err(AppError::SignalingTransient("refused".into()));
            }
            Ok(())
        }

        async fn send(&mut self, message: &SignalingMessage) -> Result<()> {
            self.sent.lock().push(message.clone());
            Ok(())
        }

        async fn receive(&mut self) -> Result<SignalingMessage> {
            match self.incoming.recv().await {
                Some(msg) => msg,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeEndpoint {
        calls: Mutex<Vec<String>>,
        rejected_sdp: Option<&'static str>,
    }

    impl FakeEndpoint {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl SessionEndpoint for FakeEndpoint {
        async fn create_offer(&self) -> Result<SessionDescription> {
            self.calls.lock().push("create_offer".into());
            Ok(SessionDescription::offer("local-offer"))
        }

        async fn create_answer(&self) -> Result<SessionDescription> {
            self.calls.lock().push("create_answer".into());
            Ok(SessionDescription::answer("local-answer"))
        }

        async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
            self.calls.lock().push(format!("set_remote:{}", desc.sdp));
            if self.rejected_sdp == Some(desc.sdp.as_str()) {
                return Err(AppError::WebRtcError("bad sdp".into()));
            }
            Ok(())
        }
    }

    fn negotiator(
        role: Role,
        transport: FakeTransport,
    ) -> (Negotiator<FakeTransport, FakeEndpoint>, Arc<FakeEndpoint>) {
        let endpoint = Arc::new(FakeEndpoint::default());
        let n = Negotiator::new(
            role,
            transport,
            endpoint.clone(),
            SessionStateMachine::new(),
            Duration::from_millis(500),
        );
        (n, endpoint)
    }

    #[tokio::test]
    async fn test_offerer_handshake() {
        let (transport, handle) = fake_transport();
        let (mut n, endpoint) = negotiator(Role::Offerer, transport);
        let state = n.state().clone();

        handle
            .incoming
            .send(Ok(SignalingMessage::Answer { sdp: "remote".into() }))
            .unwrap();
        handle.incoming.send(Ok(SignalingMessage::Bye)).unwrap();

        let end = n.run(CancellationToken::new()).await.unwrap();
        assert_eq!(end, NegotiationEnd::RemoteBye);
        assert_eq!(state.current(), SessionState::Closed);
        assert_eq!(endpoint.calls(), vec!["create_offer", "set_remote:remote"]);
        assert_eq!(
            *handle.sent.lock(),
            vec![SignalingMessage::Offer {
                sdp: "local-offer".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_answerer_replies_to_offer() {
        let (transport, handle) = fake_transport();
        let (mut n, endpoint) = negotiator(Role::Answerer, transport);
        let state = n.state().clone();
        let mut rx = state.subscribe();

        handle
            .incoming
            .send(Ok(SignalingMessage::Offer { sdp: "remote".into() }))
            .unwrap();
        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { n.run(cancel).await }
        });

        while *rx.borrow_and_update() != SessionState::AnswerExchanged {
            rx.changed().await.unwrap();
        }
        cancel.cancel();
        assert_eq!(run.await.unwrap().unwrap(), NegotiationEnd::LocalShutdown);

        assert_eq!(
            endpoint.calls(),
            vec!["set_remote:remote", "create_answer"]
        );
        // Answer, then a best-effort bye on shutdown
        assert_eq!(
            *handle.sent.lock(),
            vec![
                SignalingMessage::Answer {
                    sdp: "local-answer".into()
                },
                SignalingMessage::Bye
            ]
        );
        assert_eq!(state.current(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_answerer_never_offered_stays_awaiting() {
        let (transport, handle) = fake_transport();
        let (mut n, endpoint) = negotiator(Role::Answerer, transport);
        let state = n.state().clone();

        let mut run = task::spawn(n.run(CancellationToken::new()));
        assert_pending!(run.poll());
        assert_pending!(run.poll());

        assert_eq!(state.current(), SessionState::AwaitingOffer);
        assert!(endpoint.calls().is_empty());
        assert!(handle.sent.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let (mut transport, handle) = fake_transport();
        transport.failing_connects = 2;
        let (mut n, endpoint) = negotiator(Role::Answerer, transport);

        handle
            .incoming
            .send(Err(AppError::SignalingTransient("reset".into())))
            .unwrap();
        handle
            .incoming
            .send(Ok(SignalingMessage::Offer { sdp: "remote".into() }))
            .unwrap();
        handle.incoming.send(Ok(SignalingMessage::Bye)).unwrap();

        let end = n.run(CancellationToken::new()).await.unwrap();
        assert_eq!(end, NegotiationEnd::RemoteBye);
        assert_eq!(n.transport().connects, 3);
        assert_eq!(
            endpoint.calls(),
            vec!["set_remote:remote", "create_answer"]
        );
    }

    #[tokio::test]
    async fn test_fatal_error_closes_session() {
        let (transport, handle) = fake_transport();
        let (mut n, _endpoint) = negotiator(Role::Answerer, transport);
        let state = n.state().clone();

        handle
            .incoming
            .send(Err(AppError::Signaling("listener lost".into())))
            .unwrap();
        assert!(n.run(CancellationToken::new()).await.is_err());
        assert_eq!(state.current(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_external_close_ends_loop() {
        let (transport, handle) = fake_transport();
        let (mut n, _endpoint) = negotiator(Role::Offerer, transport);
        let state = n.state().clone();

        let run = tokio::spawn(async move { n.run(CancellationToken::new()).await });
        let mut rx = state.subscribe();
        while *rx.borrow_and_update() != SessionState::OfferSent {
            rx.changed().await.unwrap();
        }
        state.close();

        assert_eq!(run.await.unwrap().unwrap(), NegotiationEnd::SessionClosed);
        assert_eq!(handle.sent.lock().last(), Some(&SignalingMessage::Bye));
    }

    #[tokio::test]
    async fn test_unexpected_description_ignored() {
        let (transport, handle) = fake_transport();
        let (mut n, endpoint) = negotiator(Role::Answerer, transport);

        handle
            .incoming
            .send(Ok(SignalingMessage::Answer { sdp: "stray".into() }))
            .unwrap();
        handle.incoming.send(Ok(SignalingMessage::Bye)).unwrap();

        assert_eq!(
            n.run(CancellationToken::new()).await.unwrap(),
            NegotiationEnd::RemoteBye
        );
        assert!(endpoint.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_message_is_skipped() {
        let (transport, handle) = fake_transport();
        let (mut n, endpoint) = negotiator(Role::Answerer, transport);

        handle
            .incoming
            .send(Err(AppError::SignalingMalformed("not json".into())))
            .unwrap();
        handle
            .incoming
            .send(Ok(SignalingMessage::Offer { sdp: "remote".into() }))
            .unwrap();
        handle.incoming.send(Ok(SignalingMessage::Bye)).unwrap();

        assert_eq!(
            n.run(CancellationToken::new()).await.unwrap(),
            NegotiationEnd::RemoteBye
        );
        assert_eq!(
            endpoint.calls(),
            vec!["set_remote:remote", "create_answer"]
        );
    }

    #[tokio::test]
    async fn test_rejected_remote_description_keeps_waiting() {
        let (transport, handle) = fake_transport();
        let endpoint = Arc::new(FakeEndpoint {
            rejected_sdp: Some("broken"),
            ..Default::default()
        });
        let mut n = Negotiator::new(
            Role::Answerer,
            transport,
            endpoint.clone(),
            SessionStateMachine::new(),
            Duration::from_millis(500),
        );

        for sdp in ["broken", "remote"] {
            handle
                .incoming
                .send(Ok(SignalingMessage::Offer { sdp: sdp.into() }))
                .unwrap();
        }
        handle.incoming.send(Ok(SignalingMessage::Bye)).unwrap();

        assert_eq!(
            n.run(CancellationToken::new()).await.unwrap(),
            NegotiationEnd::RemoteBye
        );
        assert_eq!(
            endpoint.calls(),
            vec!["set_remote:broken", "set_remote:remote", "create_answer"]
        );
        assert_eq!(
            *handle.sent.lock(),
            vec![SignalingMessage::Answer {
                sdp: "local-answer".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_answerer_over_tcp_skips_undecodable_line() {
        use crate::webrtc::TcpSignaling;
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let endpoint = Arc::new(FakeEndpoint::default());
        let state = SessionStateMachine::new();
        let mut n = Negotiator::new(
            Role::Answerer,
            TcpSignaling::dial(addr),
            endpoint.clone(),
            state.clone(),
            Duration::from_millis(50),
        );
        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { n.run(cancel).await }
        });

        let (mut peer, _) = listener.accept().await.unwrap();
        peer.write_all(b"not json\n{\"type\":\"offer\",\"sdp\":\"v=0\"}\n")
            .await
            .unwrap();

        let mut reader = BufReader::new(&mut peer);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(
            serde_json::from_str::<SignalingMessage>(line.trim_end()).unwrap(),
            SignalingMessage::Answer {
                sdp: "local-answer".into()
            }
        );
        assert_eq!(state.current(), SessionState::AnswerExchanged);

        cancel.cancel();
        assert_eq!(run.await.unwrap().unwrap(), NegotiationEnd::LocalShutdown);
        assert_eq!(endpoint.calls(), vec!["set_remote:v=0", "create_answer"]);
    }
}
