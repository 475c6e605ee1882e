//! Offer/answer negotiation against a single peer session.

use crate::calls::CallError;
use crate::config::MediaConfig;
use crate::peer::PeerSession;
use crate::types::{ConnectivityCandidate, MediaKind, SdpType, SessionDescription};
use log::{debug, info, warn};
use std::collections::BTreeSet;

/// Owns the peer session of one call attempt.
///
/// Local and remote descriptions are each set at most once. After
/// [`close`](Self::close) every operation fails with `InvalidState`.
pub struct SessionNegotiator {
    session: Option<Box<dyn PeerSession>>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    tracks: BTreeSet<MediaKind>,
}

impl SessionNegotiator {
    pub fn new(session: Box<dyn PeerSession>) -> Self {
        Self {
            session: Some(session),
            local: None,
            remote: None,
            tracks: BTreeSet::new(),
        }
    }

    fn session(&self) -> Result<&dyn PeerSession, CallError> {
        self.session
            .as_deref()
            .ok_or_else(|| CallError::InvalidState("peer session already closed".into()))
    }

    /// Attaches the local capture tracks enabled in `media`.
    pub async fn attach_local_media(&mut self, media: &MediaConfig) -> Result<(), CallError> {
        let wanted = [(MediaKind::Audio, media.audio), (MediaKind::Video, media.video)];
        for (kind, enabled) in wanted {
            if !enabled || self.tracks.contains(&kind) {
                continue;
            }
            self.session()?.add_track(kind).await?;
            debug!("Attached local {kind} track");
            self.tracks.insert(kind);
        }
        Ok(())
    }

    pub fn has_track(&self, kind: MediaKind) -> bool {
        self.tracks.contains(&kind)
    }

    /// Produces an offer and installs it as the local description.
    pub async fn create_offer(&mut self) -> Result<SessionDescription, CallError> {
        self.ensure_no_local()?;
        let session = self.session()?;
        let offer = session.create_offer().await?;
        session.set_local_description(&offer).await?;
        debug!("Local offer set ({} bytes)", offer.sdp().len());
        self.local = Some(offer.clone());
        Ok(offer)
    }

    /// Produces an answer to the remote offer and installs it as the local description.
    pub async fn create_answer(&mut self) -> Result<SessionDescription, CallError> {
        self.ensure_no_local()?;
        match self.remote.as_ref().map(SessionDescription::kind) {
            Some(SdpType::Offer) => {}
            _ => {
                return Err(CallError::InvalidState(
                    "cannot answer without a remote offer".into(),
                ));
            }
        }
        let session = self.session()?;
        let answer = session.create_answer().await?;
        session.set_local_description(&answer).await?;
        debug!("Local answer set ({} bytes)", answer.sdp().len());
        self.local = Some(answer.clone());
        Ok(answer)
    }

    /// Applies the remote description. Callers release buffered candidates
    /// only after this returns `Ok`.
    pub async fn set_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), CallError> {
        if self.remote.is_some() {
            return Err(CallError::InvalidState(
                "remote description already set".into(),
            ));
        }
        self.session()?.set_remote_description(&desc).await?;
        debug!("Remote {} set ({} bytes)", desc.kind(), desc.sdp().len());
        self.remote = Some(desc);
        Ok(())
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote.is_some()
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local.as_ref()
    }

    /// Hands a remote candidate to the engine. A rejected candidate is logged
    /// and otherwise ignored.
    pub async fn add_remote_candidate(&self, candidate: &ConnectivityCandidate) {
        let Ok(session) = self.session() else {
            debug!("Ignoring candidate for closed session");
            return;
        };
        if let Err(e) = session.add_candidate(candidate).await {
            warn!("Remote candidate rejected ({}): {e}", candidate.candidate);
        }
    }

    /// Enables or disables the local track of `kind`; no-op without such a track.
    pub async fn set_local_media_enabled(
        &self,
        kind: MediaKind,
        enabled: bool,
    ) -> Result<(), CallError> {
        let session = self.session()?;
        if !self.tracks.contains(&kind) {
            debug!("No local {kind} track, ignoring enable={enabled}");
            return Ok(());
        }
        session.set_track_enabled(kind, enabled).await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_none()
    }

    /// Releases the peer session. Later calls are no-ops.
    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
            info!("Peer session closed");
        }
    }

    fn ensure_no_local(&self) -> Result<(), CallError> {
        match &self.local {
            Some(desc) => Err(CallError::InvalidState(format!(
                "local {} already set",
                desc.kind()
            ))),
            None => Ok(()),
        }
    }
}
