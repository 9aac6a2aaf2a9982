//! JPEG video over RTP
//!
//! Each frame is one JPEG picture split across RTP packets sharing the
//! frame's timestamp. Every payload starts with the 4-byte big-endian offset
//! of its chunk in the picture; the last packet of a frame has the marker bit.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

use crate::error::{AppError, Result};
use crate::utils::LogThrottler;
use crate::video::{JpegCodec, VideoFrame, VIDEO_CLOCK_RATE, VIDEO_TIME_BASE};

/// MIME type negotiated for the video track
pub const JPEG_MIME_TYPE: &str = "video/JPEG";

/// Static RTP payload type for JPEG
pub const JPEG_PAYLOAD_TYPE: u8 = 26;

/// Default MTU for RTP packets (conservative for most networks)
pub const RTP_MTU: usize = 1200;

const OFFSET_SIZE: usize = 4;

pub fn jpeg_codec_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: JPEG_MIME_TYPE.to_string(),
        clock_rate: VIDEO_CLOCK_RATE,
        channels: 0,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

/// Codec parameters registered with the media engine on both peers
pub fn jpeg_codec_parameters() -> RTCRtpCodecParameters {
    RTCRtpCodecParameters {
        capability: jpeg_codec_capability(),
        payload_type: JPEG_PAYLOAD_TYPE,
        ..Default::default()
    }
}

/// Splits a JPEG picture into offset-prefixed RTP payloads
#[derive(Debug, Default, Clone)]
pub struct JpegPayloader;

impl JpegPayloader {
    pub fn new() -> Self {
        Self
    }

    /// Fragment `picture` into payloads of at most `mtu` bytes
    pub fn payload(&mut self, mtu: usize, picture: &Bytes) -> Vec<Bytes> {
        if picture.is_empty() || mtu <= OFFSET_SIZE {
            return vec![];
        }

        let chunk_size = mtu - OFFSET_SIZE;
        picture
            .chunks(chunk_size)
            .enumerate()
            .map(|(i, chunk)| {
                let mut out = BytesMut::with_capacity(OFFSET_SIZE + chunk.len());
                out.put_u32((i * chunk_size) as u32);
                out.put_slice(chunk);
                out.freeze()
            })
            .collect()
    }
}

/// Rebuilds JPEG pictures from offset-prefixed payloads
///
/// Fragments must arrive in order. A gap, or a new timestamp before the
/// marker, discards the partial picture.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    timestamp: Option<u32>,
    buf: BytesMut,
    broken: bool,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one packet; returns `(timestamp, picture)` when a frame completes
    pub fn push(&mut self, packet: &rtp::packet::Packet) -> Result<Option<(u32, Bytes)>> {
        let ts = packet.header.timestamp;
        if self.timestamp != Some(ts) {
            if self.timestamp.is_some() && !self.buf.is_empty() {
                debug!("Discarding incomplete frame at ts {:?}", self.timestamp);
            }
            self.reset(Some(ts));
        }

        let payload = &packet.payload;
        if payload.len() < OFFSET_SIZE {
            self.broken = true;
            return Err(AppError::VideoError(format!(
                "RTP payload too short: {} bytes",
                payload.len()
            )));
        }

        let offset = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        if self.broken {
            if packet.header.marker {
                self.reset(None);
            }
            return Ok(None);
        }
        if offset != self.buf.len() {
            self.broken = true;
            let expected = self.buf.len();
            if packet.header.marker {
                self.reset(None);
            }
            return Err(AppError::VideoError(format!(
                "Fragment offset {} (expected {}), frame dropped",
                offset, expected
            )));
        }

        self.buf.extend_from_slice(&payload[OFFSET_SIZE..]);
        if !packet.header.marker {
            return Ok(None);
        }

        let picture = std::mem::take(&mut self.buf).freeze();
        self.reset(None);
        Ok(Some((ts, picture)))
    }

    fn reset(&mut self, timestamp: Option<u32>) {
        self.timestamp = timestamp;
        self.buf.clear();
        self.broken = false;
    }
}

/// Destination for rendered frames
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn write_frame(&self, frame: &VideoFrame) -> Result<()>;
}

/// Pull-based source of decoded frames
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the source ends
    async fn next_frame(&mut self) -> Option<VideoFrame>;
}

/// Video track statistics
#[derive(Debug, Clone, Default)]
pub struct VideoTrackStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub errors: u64,
}

struct RtpState {
    sequence_number: u16,
    timestamp_base: u32,
}

/// Local video track carrying the simulator's frames
pub struct BallVideoTrack {
    track: Arc<TrackLocalStaticRTP>,
    codec: JpegCodec,
    payloader: Mutex<JpegPayloader>,
    state: Mutex<RtpState>,
    stats: Mutex<VideoTrackStats>,
}

impl BallVideoTrack {
    pub fn new(codec: JpegCodec, track_id: &str, stream_id: &str) -> Self {
        let track = Arc::new(TrackLocalStaticRTP::new(
            jpeg_codec_capability(),
            track_id.to_string(),
            stream_id.to_string(),
        ));

        Self {
            track,
            codec,
            payloader: Mutex::new(JpegPayloader::new()),
            state: Mutex::new(RtpState {
                sequence_number: rand::random::<u16>(),
                timestamp_base: rand::random::<u32>(),
            }),
            stats: Mutex::new(VideoTrackStats::default()),
        }
    }

    /// Get track as TrackLocal for peer connection
    pub fn as_track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.track.clone()
    }

    pub fn stats(&self) -> VideoTrackStats {
        self.stats.lock().clone()
    }

    /// Build the RTP packets for one encoded picture
    fn packetize(&self, picture: &Bytes, pts: u64) -> Vec<rtp::packet::Packet> {
        let payloads = self.payloader.lock().payload(RTP_MTU, picture);
        if payloads.is_empty() {
            return vec![];
        }

        // Sequence numbers are reserved up front so the lock is not held during I/O
        let (seq_start, timestamp) = {
            let mut state = self.state.lock();
            let seq_start = state.sequence_number;
            state.sequence_number = seq_start.wrapping_add(payloads.len() as u16);
            (seq_start, state.timestamp_base.wrapping_add(pts as u32))
        };

        let last = payloads.len() - 1;
        payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| rtp::packet::Packet {
                header: rtp::header::Header {
                    version: 2,
                    marker: i == last,
                    payload_type: JPEG_PAYLOAD_TYPE,
                    sequence_number: seq_start.wrapping_add(i as u16),
                    timestamp,
                    ..Default::default()
                },
                payload,
            })
            .collect()
    }
}

#[async_trait]
impl FrameSink for BallVideoTrack {
    async fn write_frame(&self, frame: &VideoFrame) -> Result<()> {
        let picture = self.codec.encode(frame)?;
        let packets = self.packetize(&picture, frame.pts);

        let mut sent = 0u64;
        let mut failed = 0u64;
        for packet in &packets {
            match self.track.write_rtp(packet).await {
                Ok(_) => sent += 1,
                Err(e) => {
                    failed += 1;
                    trace!("JPEG write_rtp failed: {}", e);
                }
            }
        }

        let mut stats = self.stats.lock();
        stats.frames_sent += 1;
        stats.bytes_sent += picture.len() as u64;
        stats.packets_sent += sent;
        stats.errors += failed;
        Ok(())
    }
}

/// Turns received RTP packets into decoded frames
///
/// Presentation timestamps start at 0 and advance by the RTP timestamp
/// deltas, so they keep the sender's 90 kHz spacing.
pub struct RtpFrameDecoder {
    assembler: FrameAssembler,
    codec: JpegCodec,
    last_timestamp: Option<u32>,
    pts: u64,
}

impl RtpFrameDecoder {
    pub fn new(codec: JpegCodec) -> Self {
        Self {
            assembler: FrameAssembler::new(),
            codec,
            last_timestamp: None,
            pts: 0,
        }
    }

    /// Feed one packet; yields a frame when one completes
    pub fn push(&mut self, packet: &rtp::packet::Packet) -> Result<Option<VideoFrame>> {
        let Some((timestamp, picture)) = self.assembler.push(packet)? else {
            return Ok(None);
        };

        if let Some(last) = self.last_timestamp {
            self.pts += timestamp.wrapping_sub(last) as u64;
        }
        self.last_timestamp = Some(timestamp);

        self.codec.decode(&picture, self.pts, VIDEO_TIME_BASE).map(Some)
    }
}

/// Pull-based reader over a remote JPEG track
pub struct RemoteFrameReader {
    track: Arc<TrackRemote>,
    decoder: RtpFrameDecoder,
    throttler: LogThrottler,
}

impl RemoteFrameReader {
    pub fn new(track: Arc<TrackRemote>, codec: JpegCodec) -> Self {
        Self {
            track,
            decoder: RtpFrameDecoder::new(codec),
            throttler: LogThrottler::default(),
        }
    }
}

#[async_trait]
impl FrameSource for RemoteFrameReader {
    async fn next_frame(&mut self) -> Option<VideoFrame> {
        loop {
            let packet = match self.track.read_rtp().await {
                Ok((packet, _)) => packet,
                Err(e) => {
                    debug!("Remote track {} ended: {}", self.track.id(), e);
                    return None;
                }
            };

            match self.decoder.push(&packet) {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => {}
                Err(e) => {
                    if self.throttler.should_log("remote_frame") {
                        warn!("Dropping received frame: {}", e);
                    }
                }
            }
        }
    }
}
