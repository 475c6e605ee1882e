//! Seam to the external media engine.
//!
//! The engine does capture, codecs, encryption and the media transport. This
//! crate only drives it through [`PeerSession`] and listens to the
//! [`PeerEvent`]s it reports.

use crate::config::CaptureHints;
use crate::types::{ConnectivityCandidate, MediaKind, SessionDescription};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Connection state reported by the media engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Checking,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous notifications from a peer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// The engine gathered a local candidate that must reach the remote peer.
    LocalCandidate(ConnectivityCandidate),
    ConnectionStateChanged(PeerConnectionState),
    RemoteTrackAttached(MediaKind),
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("description or candidate rejected: {0}")]
    Rejected(String),

    #[error("media engine error: {0}")]
    Engine(String),

    #[error("peer session closed")]
    Closed,
}

/// One peer connection inside the media engine.
#[async_trait]
pub trait PeerSession: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), PeerError>;

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), PeerError>;

    async fn add_candidate(&self, candidate: &ConnectivityCandidate) -> Result<(), PeerError>;

    /// Attaches a local capture track of the given kind.
    async fn add_track(&self, kind: MediaKind) -> Result<(), PeerError>;

    async fn set_track_enabled(&self, kind: MediaKind, enabled: bool) -> Result<(), PeerError>;

    async fn close(&self);
}

/// Parameters handed to the media engine for every new session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSessionConfig {
    /// Connectivity-assist servers, passed through verbatim.
    pub ice_servers: Vec<String>,
    pub capture: Option<CaptureHints>,
}

#[async_trait]
pub trait PeerSessionFactory: Send + Sync {
    /// Creates a session that reports its events on `events`.
    async fn create_session(
        &self,
        config: &PeerSessionConfig,
        events: PeerEventSender,
    ) -> Result<Box<dyn PeerSession>, PeerError>;
}
