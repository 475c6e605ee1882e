//! Call lifecycle state machine.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Lifecycle of the single call attempt an orchestrator manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum LifecycleState {
    /// No call attempt exists.
    #[default]
    Idle,
    /// Outgoing call: producing the local offer.
    Originating,
    /// Outgoing call: offer sent, waiting for the remote answer.
    AwaitingAnswer,
    /// Incoming call: applying the remote offer and producing an answer.
    Negotiating,
    /// Descriptions exchanged; media is (or is about to be) flowing.
    Active,
    /// Local hang-up in progress.
    Ending,
    /// Call finished normally.
    Ended,
    /// Call aborted by a negotiation or transport failure.
    Failed,
}

impl LifecycleState {
    /// Ended and Failed are terminal for the attempt that reached them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Failed)
    }

    /// A new attempt may only be created from these states.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Ended | Self::Failed)
    }

    /// States during which a call attempt (and its peer session) exists.
    pub fn has_attempt(&self) -> bool {
        matches!(
            self,
            Self::Originating | Self::AwaitingAnswer | Self::Negotiating | Self::Active | Self::Ending
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Short status line suitable for a UI.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "Disconnected",
            Self::Originating => "Calling...",
            Self::AwaitingAnswer => "Ringing...",
            Self::Negotiating => "Incoming Call...",
            Self::Active => "Connected",
            Self::Ending => "Ending...",
            Self::Ended => "Ended",
            Self::Failed => "Failed",
        }
    }

    /// Computes the state reached by applying `transition`.
    pub fn next(self, transition: CallTransition) -> Result<LifecycleState, InvalidTransition> {
        use CallTransition as T;
        use LifecycleState as S;

        let next = match (self, transition) {
            (S::Idle | S::Ended | S::Failed, T::StartCall) => S::Originating,
            (S::Idle | S::Ended | S::Failed, T::OfferReceived) => S::Negotiating,
            (S::Originating, T::OfferSent) => S::AwaitingAnswer,
            (S::Originating | S::AwaitingAnswer, T::AnswerApplied) => S::Active,
            (S::Negotiating, T::AnswerSent) => S::Active,
            (
                S::Originating | S::AwaitingAnswer | S::Negotiating | S::Active,
                T::TransportConnected,
            ) => S::Active,
            (
                S::Originating | S::AwaitingAnswer | S::Negotiating | S::Active,
                T::TransportDisconnected,
            ) => S::Ended,
            (
                S::Originating | S::AwaitingAnswer | S::Negotiating | S::Active,
                T::TransportFailed,
            ) => S::Failed,
            (S::Originating | S::AwaitingAnswer | S::Negotiating | S::Active, T::EndRequested) => {
                S::Ending
            }
            (S::Ending, T::Closed) => S::Ended,
            (
                S::Originating | S::AwaitingAnswer | S::Negotiating | S::Active | S::Ending,
                T::NegotiationFailed,
            ) => S::Failed,
            (current, attempted) => {
                return Err(InvalidTransition { current, attempted });
            }
        };
        Ok(next)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Events that move the lifecycle forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CallTransition {
    /// User asked to place a call.
    StartCall,
    /// Local offer produced and handed to the relay.
    OfferSent,
    /// Remote offer arrived while no call was in progress.
    OfferReceived,
    /// Remote answer applied as the remote description.
    AnswerApplied,
    /// Local answer produced and handed to the relay.
    AnswerSent,
    /// Peer transport reported connectivity.
    TransportConnected,
    /// Peer transport went away cleanly.
    TransportDisconnected,
    /// Peer transport failed.
    TransportFailed,
    /// User asked to hang up.
    EndRequested,
    /// Resources for the attempt have been released after a hang-up.
    Closed,
    /// The peer session rejected a negotiation step.
    NegotiationFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition {attempted:?} in state {current:?}")]
pub struct InvalidTransition {
    pub current: LifecycleState,
    pub attempted: CallTransition,
}
