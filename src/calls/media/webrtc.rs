//! webrtc-rs implementation of [`PeerSession`].
//!
//! Each session is one `RTCPeerConnection` with an Opus and a VP8 sample
//! track. Engine callbacks are translated into [`PeerEvent`]s; disabling a
//! track detaches it from its sender and enabling it puts it back, so no
//! renegotiation is needed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::Mutex;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::peer::{
    PeerConnectionState, PeerError, PeerEvent, PeerEventSender, PeerSession, PeerSessionConfig,
    PeerSessionFactory,
};
use crate::types::{ConnectivityCandidate, MediaKind, SdpType, SessionDescription};

const STREAM_ID: &str = "stream0";
const RTCP_BUFFER_SIZE: usize = 1500;

fn engine_error(e: webrtc::Error) -> PeerError {
    PeerError::Engine(e.to_string())
}

fn rejected(e: webrtc::Error) -> PeerError {
    PeerError::Rejected(e.to_string())
}

/// Creates webrtc-rs peer connections with default codecs and interceptors.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcPeerSessionFactory;

impl WebRtcPeerSessionFactory {
    pub fn new() -> Self {
        Self
    }

    fn build_api() -> Result<webrtc::api::API, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(engine_error)?;

        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media_engine).map_err(engine_error)?;

        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build())
    }
}

#[async_trait]
impl PeerSessionFactory for WebRtcPeerSessionFactory {
    async fn create_session(
        &self,
        config: &PeerSessionConfig,
        events: PeerEventSender,
    ) -> Result<Box<dyn PeerSession>, PeerError> {
        let api = Self::build_api()?;
        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(engine_error)?,
        );

        if let Some(capture) = config.capture {
            debug!(
                "Capture target {}x{} @ {} fps",
                capture.width, capture.height, capture.frame_rate
            );
        }

        install_callbacks(&pc, events);
        Ok(Box::new(WebRtcPeerSession {
            pc,
            tracks: Mutex::new(HashMap::new()),
        }))
    }
}

fn install_callbacks(pc: &Arc<RTCPeerConnection>, events: PeerEventSender) {
    let candidate_tx = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let tx = candidate_tx.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                debug!("ICE candidate gathering complete");
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    let _ = tx.send(PeerEvent::LocalCandidate(ConnectivityCandidate::new(
                        init.candidate,
                        init.sdp_mid.unwrap_or_default(),
                        init.sdp_mline_index.unwrap_or_default(),
                    )));
                }
                Err(e) => warn!("Failed to serialize local candidate: {e}"),
            }
        })
    }));

    let state_tx = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let tx = state_tx.clone();
        Box::pin(async move {
            info!("Peer connection state: {state}");
            let mapped = match state {
                RTCPeerConnectionState::New => PeerConnectionState::New,
                RTCPeerConnectionState::Connecting => PeerConnectionState::Checking,
                RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
                RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
                RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
                RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
                RTCPeerConnectionState::Unspecified => return,
            };
            let _ = tx.send(PeerEvent::ConnectionStateChanged(mapped));
        })
    }));

    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let tx = events.clone();
        Box::pin(async move {
            let kind = match track.kind() {
                RTPCodecType::Audio => MediaKind::Audio,
                RTPCodecType::Video => MediaKind::Video,
                RTPCodecType::Unspecified => return,
            };
            let _ = tx.send(PeerEvent::RemoteTrackAttached(kind));
        })
    }));
}

struct LocalTrack {
    sender: Arc<RTCRtpSender>,
    track: Arc<TrackLocalStaticSample>,
}

pub struct WebRtcPeerSession {
    pc: Arc<RTCPeerConnection>,
    tracks: Mutex<HashMap<MediaKind, LocalTrack>>,
}

impl WebRtcPeerSession {
    /// The sample track of `kind`, for the host's capture pipeline to write into.
    pub async fn local_track(&self, kind: MediaKind) -> Option<Arc<TrackLocalStaticSample>> {
        self.tracks
            .lock()
            .await
            .get(&kind)
            .map(|local| local.track.clone())
    }

    fn to_rtc(desc: &SessionDescription) -> Result<RTCSessionDescription, PeerError> {
        let sdp = desc.sdp().to_owned();
        match desc.kind() {
            SdpType::Offer => RTCSessionDescription::offer(sdp),
            SdpType::Answer => RTCSessionDescription::answer(sdp),
        }
        .map_err(rejected)
    }
}

#[async_trait]
impl PeerSession for WebRtcPeerSession {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let offer = self.pc.create_offer(None).await.map_err(engine_error)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let answer = self.pc.create_answer(None).await.map_err(engine_error)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), PeerError> {
        self.pc
            .set_local_description(Self::to_rtc(desc)?)
            .await
            .map_err(rejected)
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), PeerError> {
        self.pc
            .set_remote_description(Self::to_rtc(desc)?)
            .await
            .map_err(rejected)
    }

    async fn add_candidate(&self, candidate: &ConnectivityCandidate) -> Result<(), PeerError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: Some(candidate.sdp_mid.clone()),
            sdp_mline_index: Some(candidate.sdp_m_line_index),
            username_fragment: None,
        };
        self.pc.add_ice_candidate(init).await.map_err(rejected)
    }

    async fn add_track(&self, kind: MediaKind) -> Result<(), PeerError> {
        let (mime_type, track_id) = match kind {
            MediaKind::Audio => (MIME_TYPE_OPUS, "audio0"),
            MediaKind::Video => (MIME_TYPE_VP8, "video0"),
        };
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            track_id.to_owned(),
            STREAM_ID.to_owned(),
        ));
        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(engine_error)?;

        // Incoming RTCP has to be read for the interceptors to work.
        let rtcp_sender = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut buf = vec![0u8; RTCP_BUFFER_SIZE];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        self.tracks
            .lock()
            .await
            .insert(kind, LocalTrack { sender, track });
        Ok(())
    }

    async fn set_track_enabled(&self, kind: MediaKind, enabled: bool) -> Result<(), PeerError> {
        let tracks = self.tracks.lock().await;
        let Some(local) = tracks.get(&kind) else {
            return Ok(());
        };
        let replacement = enabled.then(|| Arc::clone(&local.track) as Arc<dyn TrackLocal + Send + Sync>);
        local
            .sender
            .replace_track(replacement)
            .await
            .map_err(engine_error)
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("Error closing peer connection: {e}");
        }
    }
}
