//! Observer-facing event payloads.

use serde::Serialize;
use std::fmt;

use crate::state::LifecycleState;
use crate::types::MediaKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateChanged {
    pub from: LifecycleState,
    pub to: LifecycleState,
}

/// The remote peer started sending a track of this kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemoteTrackAttached {
    pub kind: MediaKind,
}

/// Category of a recoverable error surfaced to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CallErrorKind {
    ChannelUnavailable,
    CallAlreadyActive,
    InvalidState,
    Negotiation,
    /// Writing a frame to the relay failed.
    SendFailed,
    /// The relay connection dropped.
    RelayLost,
    /// The media engine reported a failed peer connection.
    TransportFailed,
    MediaToggle,
    AudioRoute,
}

impl CallErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChannelUnavailable => "channel_unavailable",
            Self::CallAlreadyActive => "call_already_active",
            Self::InvalidState => "invalid_state",
            Self::Negotiation => "negotiation",
            Self::SendFailed => "send_failed",
            Self::RelayLost => "relay_lost",
            Self::TransportFailed => "transport_failed",
            Self::MediaToggle => "media_toggle",
            Self::AudioRoute => "audio_route",
        }
    }
}

impl fmt::Display for CallErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallErrorEvent {
    pub kind: CallErrorKind,
    pub message: String,
}

impl CallErrorEvent {
    pub fn new(kind: CallErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for CallErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
