//! Platform-agnostic core of the call signaling engine.
//!
//! Everything in this crate is plain data and pure logic: the session
//! description and candidate types, the JSON wire codec spoken over the relay,
//! the lifecycle transition table and the candidate buffer. The runtime-bound
//! pieces (relay transport, peer-session plumbing, the orchestrator actor)
//! live in the `peercall` crate.

pub mod candidate_buffer;
pub mod events;
pub mod protocol;
pub mod state;
pub mod types;

pub use candidate_buffer::CandidateBuffer;
pub use protocol::{FrameError, SignalingMessage};
pub use state::{CallTransition, InvalidTransition, LifecycleState};
pub use types::{ConnectivityCandidate, MediaKind, SdpType, SessionDescription};
