//! Call orchestration.
//!
//! # Architecture
//!
//! - [`CallOrchestrator`]: cloneable control surface (start, end, mute, video, speaker)
//! - [`Orchestrator`]: the actor behind it; the only owner of the relay channel,
//!   the current [`CallAttempt`] and the lifecycle state
//! - [`CallAttempt`]: one negotiation from creation to teardown, tagged with an [`AttemptId`]
//! - [`CallError`]: errors returned by control operations
//!
//! # Event flow
//!
//! Relay frames, peer-session callbacks and user commands are forwarded into
//! a single queue. Each input is handled to completion before the next one is
//! read, so no two transitions for the same attempt ever interleave. Peer
//! events carry the id of the attempt that produced them and are dropped if
//! that attempt is no longer current.

pub mod attempt;
mod error;
pub mod messages;
pub mod orchestrator;

#[cfg(feature = "webrtc")]
pub mod media;

pub use attempt::{AttemptId, CallAttempt, CallDirection};
pub use error::CallError;
pub use orchestrator::{CallFlags, CallOrchestrator, CallOrchestratorBuilder, Orchestrator};
