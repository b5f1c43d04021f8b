//! webrtc-rs implementation of the negotiation engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prism_common::{SdpType, SessionDescription};
use prism_media::{
    channel_source, FrameSource, H264Decoder, H264Encoder, PixelFormat, TimeBase, VideoFrame,
};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::io::sample_builder::SampleBuilder;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::codecs::h264::H264Packet;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::RTCPFeedback;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::negotiation::{InboundTracks, NegotiationEngine, NegotiationError, NegotiationSession};
use crate::relay::VideoRelayTrack;

const VIDEO_CLOCK_RATE: u32 = 90_000;
const H264_PAYLOAD_TYPE: u8 = 102;
const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";
const MAX_LATE_PACKETS: u16 = 128;
/// Inbound frames buffered per track before the oldest consumer falls behind.
const FRAME_BUFFER: usize = 30;
/// Raw frames waiting for the outbound encoder.
const ENCODE_QUEUE: usize = 2;
const DEFAULT_FRAME_DURATION: Duration = Duration::from_millis(33);

impl From<webrtc::Error> for NegotiationError {
    fn from(e: webrtc::Error) -> Self {
        NegotiationError::engine(e)
    }
}

/// Constrained-baseline H.264, the profile openh264 encodes and browsers
/// always offer.
fn h264_capability() -> RTCRtpCodecCapability {
    let feedback = |typ: &str, parameter: &str| RTCPFeedback {
        typ: typ.to_owned(),
        parameter: parameter.to_owned(),
    };
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_H264.to_owned(),
        clock_rate: VIDEO_CLOCK_RATE,
        channels: 0,
        sdp_fmtp_line: H264_FMTP.to_owned(),
        rtcp_feedback: vec![
            feedback("goog-remb", ""),
            feedback("ccm", "fir"),
            feedback("nack", ""),
            feedback("nack", "pli"),
        ],
    }
}

/// Builds one peer connection per call. Video is H.264 both ways so the
/// relay can decode it, filter it and encode it again.
pub struct WebRtcEngine {
    ice_servers: Vec<String>,
}

impl WebRtcEngine {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }

    fn api() -> Result<API, webrtc::Error> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: h264_capability(),
                payload_type: H264_PAYLOAD_TYPE,
                ..Default::default()
            },
            RTPCodecType::Video,
        )?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build())
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

fn remote_description(remote: SessionDescription) -> Result<RTCSessionDescription, NegotiationError> {
    let parsed = match remote.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(remote.sdp),
        SdpType::Answer => RTCSessionDescription::answer(remote.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(remote.sdp),
        SdpType::Rollback => {
            return Err(NegotiationError::invalid("rollback cannot open a session"));
        }
    };
    parsed.map_err(NegotiationError::invalid)
}

#[async_trait]
impl NegotiationEngine for WebRtcEngine {
    async fn open(
        &self,
        remote: SessionDescription,
    ) -> Result<Arc<dyn NegotiationSession>, NegotiationError> {
        let remote = remote_description(remote)?;

        let api = Self::api()?;
        let pc = Arc::new(api.new_peer_connection(self.configuration()).await?);

        // Added up front so the answer already offers video back.
        let outbound = Arc::new(TrackLocalStaticSample::new(
            h264_capability(),
            "video".to_owned(),
            "prism".to_owned(),
        ));
        let sender = pc
            .add_track(Arc::clone(&outbound) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        tokio::spawn(async move {
            let mut rtcp = vec![0u8; 1500];
            while sender.read(&mut rtcp).await.is_ok() {}
        });

        let (tracks_tx, tracks_rx) = mpsc::channel::<Arc<dyn FrameSource>>(4);
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tracks_tx = tracks_tx.clone();
            Box::pin(async move {
                if track.kind() != RTPCodecType::Video {
                    debug!("ignoring inbound {} track", track.kind());
                    return;
                }
                info!(
                    "inbound video track: ssrc={}, codec={}",
                    track.ssrc(),
                    track.codec().capability.mime_type
                );
                let (frames_tx, source) = channel_source(FRAME_BUFFER);
                let (samples_tx, samples_rx) = mpsc::channel(FRAME_BUFFER);
                tokio::spawn(read_h264(track, samples_tx));
                tokio::task::spawn_blocking(move || decode_h264(samples_rx, frames_tx));
                if tracks_tx.send(Arc::new(source)).await.is_err() {
                    debug!("inbound video track arrived after its call ended");
                }
            })
        }));

        let (closed_tx, _) = watch::channel(false);
        let closed = Arc::new(closed_tx);
        let on_state = closed.clone();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let closed = on_state.clone();
            Box::pin(async move {
                debug!("peer connection state: {}", state);
                // Disconnected may still recover; Failed and Closed are final.
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                ) {
                    closed.send_replace(true);
                }
            })
        }));

        Ok(Arc::new(WebRtcSession {
            pc,
            remote: Mutex::new(Some(remote)),
            outbound,
            tracks: Mutex::new(Some(tracks_rx)),
            closed,
        }))
    }
}

struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
    remote: Mutex<Option<RTCSessionDescription>>,
    outbound: Arc<TrackLocalStaticSample>,
    tracks: Mutex<Option<InboundTracks>>,
    closed: Arc<watch::Sender<bool>>,
}

#[async_trait]
impl NegotiationSession for WebRtcSession {
    async fn video_tracks(&self) -> Option<InboundTracks> {
        self.tracks.lock().await.take()
    }

    async fn negotiate(&self) -> Result<SessionDescription, NegotiationError> {
        let remote = self
            .remote
            .lock()
            .await
            .take()
            .ok_or_else(|| NegotiationError::engine("session already negotiated"))?;

        self.pc
            .set_remote_description(remote)
            .await
            .map_err(NegotiationError::invalid)?;
        let answer = self.pc.create_answer(None).await?;

        // The HTTP answer is final, so wait for every local candidate.
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(answer).await?;
        let _ = gathered.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| NegotiationError::engine("no local description after answer"))?;
        Ok(SessionDescription::new(SdpType::Answer, local.sdp))
    }

    async fn attach_outbound(&self, track: VideoRelayTrack) -> Result<(), NegotiationError> {
        let mut closed = self.closed.subscribe();
        let track_id = track.id();
        let (raw_tx, raw_rx) = mpsc::channel(ENCODE_QUEUE);
        let (encoded_tx, encoded_rx) = mpsc::channel(ENCODE_QUEUE);

        tokio::task::spawn_blocking(move || encode_h264(raw_rx, encoded_tx));
        tokio::spawn(write_h264(self.outbound.clone(), encoded_rx, track_id));
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    frame = track.recv() => frame,
                    _ = closed.wait_for(|closed| *closed) => break,
                };
                match frame {
                    Ok(frame) => {
                        if raw_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        info!("relay track {} stopped: {}", track_id, e);
                        break;
                    }
                }
            }
            debug!("relay track {} pump finished", track_id);
        });
        Ok(())
    }

    async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("failed to close peer connection: {}", e);
        }
        self.closed.send_replace(true);
    }
}

/// Re-assemble inbound RTP into H.264 access units.
async fn read_h264(track: Arc<TrackRemote>, samples: mpsc::Sender<VideoFrame>) {
    let mut builder = SampleBuilder::new(MAX_LATE_PACKETS, H264Packet::default(), VIDEO_CLOCK_RATE);
    loop {
        let packet = match track.read_rtp().await {
            Ok((packet, _)) => packet,
            Err(e) => {
                debug!("inbound video ssrc={} ended: {}", track.ssrc(), e);
                return;
            }
        };
        builder.push(packet);

        while let Some(sample) = builder.pop() {
            let frame = VideoFrame::encoded(
                PixelFormat::H264,
                sample.data,
                sample.packet_timestamp as i64,
                TimeBase::RTP_VIDEO,
            );
            match samples.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => trace!("inbound video ssrc={} lagging", track.ssrc()),
                Err(TrySendError::Closed(_)) => return,
            }
        }
    }
}

/// Blocking worker: decode access units into BGR frames for the relay.
fn decode_h264(mut samples: mpsc::Receiver<VideoFrame>, frames: mpsc::Sender<VideoFrame>) {
    let mut decoder = match H264Decoder::new() {
        Ok(decoder) => decoder,
        Err(e) => {
            warn!("inbound video dropped: {}", e);
            return;
        }
    };
    while let Some(sample) = samples.blocking_recv() {
        let frame = match decoder.decode(&sample) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                debug!("skipping undecodable sample: {}", e);
                continue;
            }
        };
        match frames.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!("decoded video lagging"),
            Err(TrySendError::Closed(_)) => return,
        }
    }
}

/// Blocking worker: encode relay output for the wire. Frames that are
/// already H.264 pass through.
fn encode_h264(mut raw: mpsc::Receiver<VideoFrame>, encoded: mpsc::Sender<VideoFrame>) {
    // TODO: force a keyframe when the receiver sends PLI or FIR.
    let mut encoder = H264Encoder::new();
    while let Some(frame) = raw.blocking_recv() {
        let frame = match frame.format {
            PixelFormat::H264 => frame,
            PixelFormat::Bgr24 => match encoder.encode(&frame) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("skipping unencodable frame: {}", e);
                    continue;
                }
            },
        };
        if encoded.blocking_send(frame).is_err() {
            return;
        }
    }
}

async fn write_h264(
    outbound: Arc<TrackLocalStaticSample>,
    mut encoded: mpsc::Receiver<VideoFrame>,
    track_id: Uuid,
) {
    let mut last_time: Option<f64> = None;
    while let Some(frame) = encoded.recv().await {
        let time = frame.time();
        let duration = match last_time {
            Some(prev) if time > prev => Duration::from_secs_f64(time - prev),
            _ => DEFAULT_FRAME_DURATION,
        };
        last_time = Some(time);

        let sample = Sample {
            data: frame.data,
            duration,
            ..Default::default()
        };
        if let Err(e) = outbound.write_sample(&sample).await {
            warn!("relay track {} write failed: {}", track_id, e);
            return;
        }
    }
}
