//! Peer-session adapters backed by real media engines.

mod webrtc;

pub use self::webrtc::{WebRtcPeerSession, WebRtcPeerSessionFactory};
