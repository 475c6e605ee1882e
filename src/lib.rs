// Re-export the runtime-free core
pub use callcore::{candidate_buffer, protocol, state};

// Core types are re-exported, but events (with EventBus) remain here for platform-specific functionality
pub mod types {
    pub use callcore::types::*;
    pub mod events;
}

pub mod audio;
pub mod calls;
pub mod channel;
pub mod config;
pub mod negotiator;
pub mod peer;
pub mod transport;

#[cfg(test)]
pub mod test_utils;

pub use calls::{CallError, CallOrchestrator, CallOrchestratorBuilder};
pub use config::{CallConfig, CaptureHints, ConfigError, MediaConfig};
pub use peer::{PeerError, PeerEvent, PeerSession, PeerSessionFactory};
