//! WebRTC peer connection management

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::config::WebRtcConfig;
use super::signaling::{SdpKind, SessionDescription};
use super::track::jpeg_codec_parameters;
use crate::coords::{ChannelEvent, ChannelSender};
use crate::error::{AppError, Result};
use crate::session::{SessionEndpoint, SessionState, SessionStateMachine};

/// Peer connection wrapper with event handling
pub struct PeerConnection {
    /// Session ID
    pub session_id: String,
    /// WebRTC peer connection
    pc: Arc<RTCPeerConnection>,
    /// Transport-level connection state
    state: Arc<watch::Sender<RTCPeerConnectionState>>,
}

impl PeerConnection {
    /// Create a new peer connection
    pub async fn new(config: &WebRtcConfig, session_id: String) -> Result<Self> {
        // Both peers register the same JPEG codec so the video m-line matches
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_codec(jpeg_codec_parameters(), RTPCodecType::Video)
            .map_err(|e| AppError::VideoError(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| AppError::VideoError(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?;

        let (state_tx, _) = watch::channel(RTCPeerConnectionState::New);
        let peer = Self {
            session_id,
            pc: Arc::new(pc),
            state: Arc::new(state_tx),
        };
        peer.setup_state_handler();

        Ok(peer)
    }

    fn setup_state_handler(&self) {
        let state = self.state.clone();
        let session_id = self.session_id.clone();

        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let state = state.clone();
                let session_id = session_id.clone();

                Box::pin(async move {
                    info!("Peer {} connection state: {}", session_id, s);
                    let _ = state.send(s);
                })
            }));
    }

    /// Mirror transport state into the session state machine
    ///
    /// `Connected` advances the session; `Failed` or `Closed` closes it.
    pub fn watch_state(&self, session: SessionStateMachine) -> tokio::task::JoinHandle<()> {
        let mut rx = self.state.subscribe();
        let session_id = self.session_id.clone();

        tokio::spawn(async move {
            let mut session_rx = session.subscribe();
            loop {
                let current = *rx.borrow_and_update();
                session_rx.borrow_and_update();
                match current {
                    RTCPeerConnectionState::Connected => {
                        if session.current() == SessionState::AnswerExchanged {
                            if let Err(e) = session.transition(SessionState::Connected) {
                                warn!("Peer {}: {}", session_id, e);
                            }
                        }
                    }
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => {
                        session.close();
                        return;
                    }
                    _ => {}
                }
                if session.is_closed() {
                    return;
                }

                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = session_rx.changed() => {}
                }
            }
        })
    }

    /// Add the outgoing video track and drain its RTCP
    pub async fn add_video_track(&self, track: Arc<dyn TrackLocal + Send + Sync>) -> Result<()> {
        let sender = self
            .pc
            .add_track(track)
            .await
            .map_err(|e| AppError::VideoError(format!("Failed to add video track: {}", e)))?;

        // Interceptors only run while RTCP is being read
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        info!("Video track added to peer connection");
        Ok(())
    }

    /// Forward every remote track to `tracks`
    pub fn on_track(&self, tracks: mpsc::UnboundedSender<Arc<TrackRemote>>) {
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                info!("Remote track {} (ssrc {})", track.id(), track.ssrc());
                let _ = tracks.send(track);
                Box::pin(async {})
            },
        ));
    }

    /// Create the coordinate channel (offerer side)
    pub async fn create_data_channel(
        &self,
        label: &str,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Result<Arc<RTCDataChannel>> {
        // Defaults are reliable and ordered
        let dc = self
            .pc
            .create_data_channel(label, Some(RTCDataChannelInit::default()))
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create data channel: {}", e)))?;

        bind_data_channel(&dc, events);
        info!("Data channel '{}' created", label);
        Ok(dc)
    }

    /// Accept the coordinate channel opened by the remote peer (answerer side)
    pub fn accept_data_channels(&self, label: &str, events: mpsc::UnboundedSender<ChannelEvent>) {
        let label = label.to_string();

        self.pc
            .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let events = events.clone();
                let expected = label.clone();

                Box::pin(async move {
                    if dc.label() == expected {
                        info!("Data channel '{}' announced by peer", dc.label());
                        bind_data_channel(&dc, events);
                    } else {
                        debug!("Ignoring data channel '{}'", dc.label());
                    }
                })
            }));
    }

    /// Set local description and wait for ICE gathering to finish
    ///
    /// Candidates are carried inside the description; there is no trickle.
    async fn set_local_and_gather(&self, desc: RTCSessionDescription) -> Result<SessionDescription> {
        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(desc).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to set local description: {}", e))
        })?;
        let _ = gather_complete.recv().await;

        let local = self.pc.local_description().await.ok_or_else(|| {
            AppError::WebRtcError("Local description missing after gathering".to_string())
        })?;
        debug!("Local description ready ({} bytes)", local.sdp.len());

        Ok(match local.sdp_type {
            webrtc::peer_connection::sdp::sdp_type::RTCSdpType::Offer => {
                SessionDescription::offer(local.sdp)
            }
            _ => SessionDescription::answer(local.sdp),
        })
    }

    /// Close the connection
    pub async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to close peer connection: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl SessionEndpoint for PeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create offer: {}", e)))?;
        self.set_local_and_gather(offer).await
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create answer: {}", e)))?;
        self.set_local_and_gather(answer).await
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let sdp = match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        }
        .map_err(|e| AppError::WebRtcError(format!("Invalid SDP: {}", e)))?;

        self.pc.set_remote_description(sdp).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to set remote description: {}", e))
        })
    }
}

/// Forward channel callbacks as [`ChannelEvent`]s
fn bind_data_channel(dc: &Arc<RTCDataChannel>, events: mpsc::UnboundedSender<ChannelEvent>) {
    let open_events = events.clone();
    let open_dc = dc.clone();
    dc.on_open(Box::new(move || {
        let sender: Arc<dyn ChannelSender> = open_dc.clone();
        let _ = open_events.send(ChannelEvent::Open(sender));
        Box::pin(async {})
    }));

    let message_events = events.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        match String::from_utf8(msg.data.to_vec()) {
            Ok(text) => {
                let _ = message_events.send(ChannelEvent::Message(text));
            }
            Err(_) => warn!("Ignoring binary data channel message ({} bytes)", msg.data.len()),
        }
        Box::pin(async {})
    }));

    dc.on_close(Box::new(move || {
        let _ = events.send(ChannelEvent::Closed);
        Box::pin(async {})
    }));
}

#[async_trait]
impl ChannelSender for RTCDataChannel {
    async fn send_text(&self, text: String) -> Result<()> {
        RTCDataChannel::send_text(self, text)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Data channel send failed: {}", e)))?;
        Ok(())
    }
}
