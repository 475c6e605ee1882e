use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("relay address is required")]
    MissingRelayAddress,

    #[error("relay address must be a ws:// or wss:// URL, got {0}")]
    InvalidRelayAddress(String),

    #[error("command queue capacity must be greater than zero")]
    ZeroQueueCapacity,
}

/// Capture target passed through to the media engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureHints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl Default for CaptureHints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_rate: 30,
        }
    }
}

/// Local tracks attached to every call attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub audio: bool,
    pub video: bool,
    pub capture: Option<CaptureHints>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            capture: Some(CaptureHints::default()),
        }
    }
}

impl MediaConfig {
    pub fn audio_only() -> Self {
        Self {
            video: false,
            capture: None,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// WebSocket URL of the relay.
    pub relay_address: String,
    /// Connectivity-assist (STUN/TURN) servers, used verbatim by the media engine.
    pub ice_servers: Vec<String>,
    pub media: MediaConfig,
    /// Bound on the orchestrator's serialized input queue.
    pub command_queue_capacity: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            relay_address: String::new(),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            media: MediaConfig::default(),
            command_queue_capacity: 64,
        }
    }
}

impl CallConfig {
    pub fn new(relay_address: impl Into<String>) -> Self {
        Self {
            relay_address: relay_address.into(),
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let address = self.relay_address.trim();
        if address.is_empty() {
            return Err(ConfigError::MissingRelayAddress);
        }
        if !(address.starts_with("ws://") || address.starts_with("wss://")) {
            return Err(ConfigError::InvalidRelayAddress(address.to_string()));
        }
        if self.command_queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        Ok(())
    }
}
