use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use crate::audio::mock::MockAudioRouter;
use crate::calls::messages::OrchestratorInput;
use crate::calls::orchestrator::Orchestrator;
use crate::config::CallConfig;
use crate::peer::PeerEvent;
use crate::peer::mock::MockPeer;
use crate::protocol::SignalingMessage;
use crate::transport::mock::MockRelay;
use crate::types::events::{CallErrorEvent, EventBus, StateChanged};

const INPUT_TIMEOUT: Duration = Duration::from_secs(2);

pub fn test_config() -> CallConfig {
    CallConfig::new("ws://relay.test/ws")
}

/// An orchestrator actor driven by hand, with every collaborator mocked.
///
/// Inputs produced by background pumps are pulled off the queue with
/// [`TestHarness::pump`] so each test controls exactly when they are handled.
pub struct TestHarness {
    pub orchestrator: Orchestrator,
    pub inbox: mpsc::Receiver<OrchestratorInput>,
    // Keeps the queue open while the test runs.
    _inbox_tx: mpsc::Sender<OrchestratorInput>,
    pub relay: MockRelay,
    pub peer: MockPeer,
    pub audio: MockAudioRouter,
    pub events: Arc<EventBus>,
    pub states: broadcast::Receiver<Arc<StateChanged>>,
    pub errors: broadcast::Receiver<Arc<CallErrorEvent>>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: CallConfig) -> Self {
        let relay = MockRelay::new();
        let peer = MockPeer::new();
        let audio = MockAudioRouter::default();
        let events = Arc::new(EventBus::new());
        let states = events.state_changed.subscribe();
        let errors = events.error.subscribe();
        let (orchestrator, inbox_tx, inbox) = Orchestrator::new(
            config,
            relay.factory(),
            peer.factory(),
            Arc::new(audio.clone()),
            events.clone(),
        );
        Self {
            orchestrator,
            inbox,
            _inbox_tx: inbox_tx,
            relay,
            peer,
            audio,
            events,
            states,
            errors,
        }
    }

    /// Waits for the next queued input and dispatches it.
    pub async fn pump(&mut self) {
        let input = tokio::time::timeout(INPUT_TIMEOUT, self.inbox.recv())
            .await
            .expect("timed out waiting for orchestrator input")
            .expect("orchestrator queue closed");
        self.orchestrator.dispatch(input).await;
    }

    /// Delivers a frame from the remote peer and handles it.
    pub async fn remote(&mut self, message: SignalingMessage) {
        self.relay.deliver_message(&message).await;
        self.pump().await;
    }

    /// Emits an event from the latest peer session and handles it.
    pub async fn peer_event(&mut self, event: PeerEvent) {
        self.peer.emit(event);
        self.pump().await;
    }

    /// Drains every error event published so far.
    pub fn take_errors(&mut self) -> Vec<CallErrorEvent> {
        let mut errors = Vec::new();
        while let Ok(event) = self.errors.try_recv() {
            errors.push((*event).clone());
        }
        errors
    }

    pub fn take_state_changes(&mut self) -> Vec<StateChanged> {
        let mut changes = Vec::new();
        while let Ok(event) = self.states.try_recv() {
            changes.push(*event);
        }
        changes
    }
}
