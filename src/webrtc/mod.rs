//! WebRTC transport
//!
//! ```text
//! server (offerer)                               client (answerer)
//!
//! BallTrack -> BallVideoTrack --- RTP/JPEG ---> RemoteFrameReader -> detector
//!                                                                  -> display
//! Reporter  <---------- "coordinates" data channel ----------> Requester
//!
//! Negotiator <-------- TcpSignaling (JSON lines) --------> Negotiator
//! ```

pub mod config;
pub mod peer;
pub mod signaling;
pub mod track;

pub use config::WebRtcConfig;
pub use peer::PeerConnection;
pub use signaling::{
    resolve_addr, SdpKind, SessionDescription, SignalingMessage, SignalingTransport, TcpSignaling,
};
pub use track::{
    BallVideoTrack, FrameAssembler, FrameSink, FrameSource, JpegPayloader, RemoteFrameReader,
    RtpFrameDecoder, VideoTrackStats, JPEG_MIME_TYPE, JPEG_PAYLOAD_TYPE, RTP_MTU,
};
