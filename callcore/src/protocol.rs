//! Wire protocol spoken over the relay.
//!
//! Every frame is one JSON object with a `type` discriminator:
//!
//! ```json
//! {"type":"offer","sdp":"..."}
//! {"type":"answer","sdp":"..."}
//! {"type":"candidate","candidate":{"candidate":"...","sdpMid":"0","sdpMLineIndex":0}}
//! ```
//!
//! Frames with an unknown `type` or missing required fields are rejected with
//! a [`FrameError`]; callers drop them rather than treating them as fatal.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{ConnectivityCandidate, SdpType, SessionDescription};

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("unknown signaling message type: {0}")]
    UnknownType(String),

    #[error("malformed {kind} frame: {reason}")]
    Malformed { kind: String, reason: String },
}

/// A single signaling frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: ConnectivityCandidate },
}

const KNOWN_TYPES: [&str; 3] = ["offer", "answer", "candidate"];

impl SignalingMessage {
    pub fn from_description(desc: &SessionDescription) -> Self {
        match desc.kind() {
            SdpType::Offer => SignalingMessage::Offer {
                sdp: desc.sdp().to_owned(),
            },
            SdpType::Answer => SignalingMessage::Answer {
                sdp: desc.sdp().to_owned(),
            },
        }
    }

    pub fn candidate(candidate: ConnectivityCandidate) -> Self {
        SignalingMessage::Candidate { candidate }
    }

    /// The `type` tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::Candidate { .. } => "candidate",
        }
    }

    /// Converts an offer or answer frame into a session description.
    pub fn into_description(self) -> Option<SessionDescription> {
        match self {
            SignalingMessage::Offer { sdp } => Some(SessionDescription::offer(sdp)),
            SignalingMessage::Answer { sdp } => Some(SessionDescription::answer(sdp)),
            SignalingMessage::Candidate { .. } => None,
        }
    }

    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingField("type"))?
            .to_owned();

        if !KNOWN_TYPES.contains(&kind.as_str()) {
            return Err(FrameError::UnknownType(kind));
        }

        serde_json::from_value(value).map_err(|e| FrameError::Malformed {
            kind,
            reason: e.to_string(),
        })
    }
}
