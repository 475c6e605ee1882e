//! Call-related error types.

use crate::peer::PeerError;
use callcore::InvalidTransition;
use callcore::events::CallErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("relay unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("a call is already in progress")]
    CallAlreadyActive,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("negotiation failed: {0}")]
    Negotiation(#[from] PeerError),

    #[error("audio route change failed: {0}")]
    AudioRoute(String),

    #[error("orchestrator has stopped")]
    OrchestratorStopped,
}

impl From<InvalidTransition> for CallError {
    fn from(err: InvalidTransition) -> Self {
        CallError::InvalidState(err.to_string())
    }
}

impl CallError {
    /// Category used when the error is published as an event.
    pub fn kind(&self) -> CallErrorKind {
        match self {
            CallError::ChannelUnavailable(_) => CallErrorKind::ChannelUnavailable,
            CallError::CallAlreadyActive => CallErrorKind::CallAlreadyActive,
            CallError::InvalidState(_) | CallError::OrchestratorStopped => {
                CallErrorKind::InvalidState
            }
            CallError::Negotiation(_) => CallErrorKind::Negotiation,
            CallError::AudioRoute(_) => CallErrorKind::AudioRoute,
        }
    }
}
