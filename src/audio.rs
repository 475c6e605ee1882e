//! Audio output routing collaborator.
//!
//! Routing has no effect on negotiation; the orchestrator only forwards the
//! request and mirrors the resulting route as a flag.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioRoute {
    #[default]
    Earpiece,
    Speaker,
}

impl AudioRoute {
    pub fn is_speaker(&self) -> bool {
        matches!(self, AudioRoute::Speaker)
    }

    pub fn toggled(self) -> Self {
        match self {
            AudioRoute::Earpiece => AudioRoute::Speaker,
            AudioRoute::Speaker => AudioRoute::Earpiece,
        }
    }
}

#[async_trait]
pub trait AudioRouter: Send + Sync {
    async fn set_route(&self, route: AudioRoute) -> Result<(), anyhow::Error>;
}

/// Router for hosts without switchable outputs; accepts every route.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAudioRouter;

#[async_trait]
impl AudioRouter for NoopAudioRouter {
    async fn set_route(&self, route: AudioRoute) -> Result<(), anyhow::Error> {
        log::debug!("Audio route set to {route:?} (no-op router)");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_alternates_routes() {
        let route = AudioRoute::default();
        assert!(!route.is_speaker());
        assert!(route.toggled().is_speaker());
        assert_eq!(route.toggled().toggled(), AudioRoute::Earpiece);
    }
}
