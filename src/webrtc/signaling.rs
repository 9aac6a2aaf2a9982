//! Signaling messages and transport
//!
//! Messages are JSON objects, one per line:
//!
//! ```text
//! {"type":"offer","sdp":"v=0..."}
//! {"type":"answer","sdp":"v=0..."}
//! {"type":"bye"}
//! ```

use std::net::SocketAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::error::{AppError, Result};

/// Signaling message types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    /// SDP offer
    Offer { sdp: String },
    /// SDP answer
    Answer { sdp: String },
    /// End of session
    Bye,
}

/// Kind of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description as exchanged by the negotiator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

impl From<SessionDescription> for SignalingMessage {
    fn from(desc: SessionDescription) -> Self {
        match desc.kind {
            SdpKind::Offer => SignalingMessage::Offer { sdp: desc.sdp },
            SdpKind::Answer => SignalingMessage::Answer { sdp: desc.sdp },
        }
    }
}

impl SignalingMessage {
    /// The carried description, `None` for `Bye`
    pub fn into_description(self) -> Option<SessionDescription> {
        match self {
            SignalingMessage::Offer { sdp } => Some(SessionDescription::offer(sdp)),
            SignalingMessage::Answer { sdp } => Some(SessionDescription::answer(sdp)),
            SignalingMessage::Bye => None,
        }
    }
}

/// Out-of-band channel carrying session descriptions between the peers
#[async_trait]
pub trait SignalingTransport: Send {
    /// Establish the underlying connection
    async fn connect(&mut self) -> Result<()>;

    async fn send(&mut self, message: &SignalingMessage) -> Result<()>;

    /// Next message; end of stream reads as `Bye`
    ///
    /// A line that does not decode is returned as
    /// [`AppError::SignalingMalformed`] and the stream stays usable.
    async fn receive(&mut self) -> Result<SignalingMessage>;

    async fn close(&mut self) -> Result<()>;
}

/// Resolve a `host:port` string to the first matching socket address
pub async fn resolve_addr(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .map_err(|e| AppError::Config(format!("Cannot resolve {}: {}", addr, e)))?
        .next()
        .ok_or_else(|| AppError::Config(format!("No address for {}", addr)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TcpMode {
    Listen,
    Dial,
}

/// Newline-delimited JSON over one TCP connection
///
/// The listening side accepts a single peer; the dialing side connects to it.
/// A broken connection is dropped and re-established by the next
/// [`connect`](SignalingTransport::connect).
pub struct TcpSignaling {
    addr: SocketAddr,
    mode: TcpMode,
    listener: Option<TcpListener>,
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<OwnedWriteHalf>,
}

impl TcpSignaling {
    /// Transport that waits for the peer to dial in
    pub fn listen(addr: SocketAddr) -> Self {
        Self::with_mode(addr, TcpMode::Listen)
    }

    /// Transport that dials the listening peer
    pub fn dial(addr: SocketAddr) -> Self {
        Self::with_mode(addr, TcpMode::Dial)
    }

    fn with_mode(addr: SocketAddr, mode: TcpMode) -> Self {
        Self {
            addr,
            mode,
            listener: None,
            reader: None,
            writer: None,
        }
    }

    /// Bind the listener now and return the bound address
    ///
    /// Lets callers listen on port 0 and hand the real port to the peer.
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if self.listener.is_none() {
            let listener = TcpListener::bind(self.addr).await?;
            self.addr = listener.local_addr()?;
            info!("Signaling listening on {}", self.addr);
            self.listener = Some(listener);
        }
        Ok(self.addr)
    }

    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    fn attach(&mut self, stream: TcpStream) {
        let (read, write) = stream.into_split();
        self.reader = Some(BufReader::new(read));
        self.writer = Some(write);
    }

    fn disconnect(&mut self) {
        self.reader = None;
        self.writer = None;
    }
}

#[async_trait]
impl SignalingTransport for TcpSignaling {
    async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        match self.mode {
            TcpMode::Listen => {
                self.bind().await?;
                let Some(listener) = self.listener.as_ref() else {
                    return Err(AppError::Signaling("Listener not bound".to_string()));
                };
                let (stream, peer) = listener.accept().await.map_err(|e| {
                    AppError::SignalingTransient(format!("Accept failed: {}", e))
                })?;
                info!("Signaling peer connected from {}", peer);
                self.attach(stream);
            }
            TcpMode::Dial => {
                let stream = TcpStream::connect(self.addr).await.map_err(|e| {
                    AppError::SignalingTransient(format!("Connect to {} failed: {}", self.addr, e))
                })?;
                info!("Signaling connected to {}", self.addr);
                self.attach(stream);
            }
        }
        Ok(())
    }

    async fn send(&mut self, message: &SignalingMessage) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        let Some(writer) = self.writer.as_mut() else {
            return Err(AppError::SignalingTransient("Not connected".to_string()));
        };
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            self.disconnect();
            return Err(AppError::SignalingTransient(format!("Send failed: {}", e)));
        }
        debug!("Signaling > {}", line.trim_end());
        Ok(())
    }

    async fn receive(&mut self) -> Result<SignalingMessage> {
        if !self.is_connected() {
            self.connect().await?;
        }
        let Some(reader) = self.reader.as_mut() else {
            return Err(AppError::SignalingTransient("Not connected".to_string()));
        };

        let mut line = String::new();
        loop {
            line.clear();
            let read = match reader.read_line(&mut line).await {
                Ok(n) => n,
                Err(e) => {
                    self.disconnect();
                    return Err(AppError::SignalingTransient(format!("Receive failed: {}", e)));
                }
            };
            if read == 0 {
                debug!("Signaling stream ended");
                self.disconnect();
                return Ok(SignalingMessage::Bye);
            }
            if !line.trim().is_empty() {
                break;
            }
        }

        debug!("Signaling < {}", line.trim_end());
        serde_json::from_str(line.trim_end())
            .map_err(|e| AppError::SignalingMalformed(format!("{}: {:?}", e, line.trim_end())))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        self.reader = None;
        self.listener = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_format() {
        let offer = SignalingMessage::Offer {
            sdp: "v=0".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&offer).unwrap(),
            r#"{"type":"offer","sdp":"v=0"}"#
        );
        assert_eq!(
            serde_json::to_string(&SignalingMessage::Bye).unwrap(),
            r#"{"type":"bye"}"#
        );

        let answer: SignalingMessage =
            serde_json::from_str(r#"{"type":"answer","sdp":"v=0\r\n"}"#).unwrap();
        assert_eq!(
            answer.into_description(),
            Some(SessionDescription::answer("v=0\r\n"))
        );
    }

    #[test]
    fn test_description_conversion() {
        let msg: SignalingMessage = SessionDescription::offer("x").into();
        assert_eq!(msg, SignalingMessage::Offer { sdp: "x".into() });
        assert_eq!(SignalingMessage::Bye.into_description(), None);
    }

    #[tokio::test]
    async fn test_tcp_exchange() {
        let mut server = TcpSignaling::listen("127.0.0.1:0".parse().unwrap());
        let addr = server.bind().await.unwrap();
        let mut client = TcpSignaling::dial(addr);

        let accept = tokio::spawn(async move {
            server.connect().await.unwrap();
            server
                .send(&SignalingMessage::Offer { sdp: "o".into() })
                .await
                .unwrap();
            let reply = server.receive().await.unwrap();
            (server, reply)
        });

        client.connect().await.unwrap();
        assert_eq!(
            client.receive().await.unwrap(),
            SignalingMessage::Offer { sdp: "o".into() }
        );
        client
            .send(&SignalingMessage::Answer { sdp: "a".into() })
            .await
            .unwrap();

        let (mut server, reply) = accept.await.unwrap();
        assert_eq!(reply, SignalingMessage::Answer { sdp: "a".into() });

        // Closing one side reads as bye on the other
        client.close().await.unwrap();
        assert_eq!(server.receive().await.unwrap(), SignalingMessage::Bye);
    }

    #[tokio::test]
    async fn test_resolve_addr() {
        let addr = resolve_addr("127.0.0.1:8080").await.unwrap();
        assert_eq!(addr, "127.0.0.1:8080".parse().unwrap());
        assert!(resolve_addr("no-port").await.is_err());
    }

    #[tokio::test]
    async fn test_dial_without_listener_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut client = TcpSignaling::dial(addr);
        let err = client.connect().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_send_before_connect_is_transient() {
        let mut client = TcpSignaling::dial("127.0.0.1:9".parse().unwrap());
        let err = client.send(&SignalingMessage::Bye).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_undecodable_line_does_not_break_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut client = TcpSignaling::dial(listener.local_addr().unwrap());
        client.connect().await.unwrap();

        let (mut peer, _) = listener.accept().await.unwrap();
        peer.write_all(b"not json\n{\"type\":\"offer\",\"sdp\":\"v=0\"}\n")
            .await
            .unwrap();

        let err = client.receive().await.unwrap_err();
        assert!(matches!(err, AppError::SignalingMalformed(_)));
        assert!(client.is_connected());
        assert_eq!(
            client.receive().await.unwrap(),
            SignalingMessage::Offer { sdp: "v=0".into() }
        );
    }
}
