//! Call orchestrator: the serialized actor that owns the relay channel, the
//! current call attempt and the lifecycle state.
//!
//! User commands, decoded relay frames and peer-session callbacks all arrive
//! as [`OrchestratorInput`] on one bounded queue and are handled strictly one
//! at a time by [`Orchestrator::run`]. The cloneable [`CallOrchestrator`]
//! handle is the public control surface.

use super::attempt::{AttemptId, CallAttempt, CallDirection};
use super::error::CallError;
use super::messages::{CallCommand, OrchestratorInput, Reply};
use crate::audio::{AudioRoute, AudioRouter, NoopAudioRouter};
use crate::candidate_buffer::CandidateBuffer;
use crate::channel::{ChannelEvent, ChannelOpen, SignalingChannel};
use crate::config::CallConfig;
use crate::negotiator::SessionNegotiator;
use crate::peer::{
    PeerConnectionState, PeerEvent, PeerSessionConfig, PeerSessionFactory,
};
use crate::protocol::SignalingMessage;
use crate::state::{CallTransition, InvalidTransition, LifecycleState};
use crate::transport::{TokioWebSocketTransportFactory, TransportFactory};
use crate::types::events::{
    CallErrorEvent, CallErrorKind, EventBus, RemoteTrackAttached, StateChanged,
};
use crate::types::{ConnectivityCandidate, MediaKind, SessionDescription};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Remote candidates held while idle, waiting for an incoming offer.
const MAX_EARLY_CANDIDATES: usize = 32;

/// Observable control flags, last write visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFlags {
    pub muted: bool,
    pub video_enabled: bool,
    pub speaker_on: bool,
}

impl Default for CallFlags {
    fn default() -> Self {
        Self {
            muted: false,
            video_enabled: true,
            speaker_on: false,
        }
    }
}

pub struct Orchestrator {
    config: CallConfig,
    channel: SignalingChannel,
    channel_generation: u64,
    peer_factory: Arc<dyn PeerSessionFactory>,
    audio_router: Arc<dyn AudioRouter>,
    attempt: Option<CallAttempt>,
    next_attempt: u64,
    // Remote candidates seen while idle, before any offer.
    early_candidates: CandidateBuffer,
    state: LifecycleState,
    state_tx: watch::Sender<LifecycleState>,
    flags: CallFlags,
    flags_tx: watch::Sender<CallFlags>,
    events: Arc<EventBus>,
    inbox: mpsc::WeakSender<OrchestratorInput>,
}

impl Orchestrator {
    /// Creates the actor together with both ends of its input queue.
    ///
    /// The actor itself only keeps a weak sender, so the queue closes once
    /// every handle is dropped.
    pub fn new(
        config: CallConfig,
        transport_factory: Arc<dyn TransportFactory>,
        peer_factory: Arc<dyn PeerSessionFactory>,
        audio_router: Arc<dyn AudioRouter>,
        events: Arc<EventBus>,
    ) -> (
        Self,
        mpsc::Sender<OrchestratorInput>,
        mpsc::Receiver<OrchestratorInput>,
    ) {
        let (inbox_tx, inbox_rx) = mpsc::channel(config.command_queue_capacity.max(1));
        let (state_tx, _) = watch::channel(LifecycleState::Idle);
        let (flags_tx, _) = watch::channel(CallFlags::default());
        let actor = Self {
            config,
            channel: SignalingChannel::new(transport_factory),
            channel_generation: 0,
            peer_factory,
            audio_router,
            attempt: None,
            next_attempt: 1,
            early_candidates: CandidateBuffer::bounded(MAX_EARLY_CANDIDATES),
            state: LifecycleState::Idle,
            state_tx,
            flags: CallFlags::default(),
            flags_tx,
            events,
            inbox: inbox_tx.downgrade(),
        };
        (actor, inbox_tx, inbox_rx)
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn flags(&self) -> CallFlags {
        self.flags
    }

    pub fn current_attempt(&self) -> Option<&CallAttempt> {
        self.attempt.as_ref()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_flags(&self) -> watch::Receiver<CallFlags> {
        self.flags_tx.subscribe()
    }

    /// Processes inputs until a shutdown command arrives or every sender is gone.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<OrchestratorInput>) {
        info!("Call orchestrator started");
        while let Some(input) = inbox.recv().await {
            if !self.dispatch(input).await {
                info!("Call orchestrator stopped");
                return;
            }
        }
        self.shutdown().await;
        info!("Call orchestrator stopped: all handles dropped");
    }

    /// Handles one input. Returns `false` once the actor should stop.
    pub async fn dispatch(&mut self, input: OrchestratorInput) -> bool {
        match input {
            OrchestratorInput::Command(command) => return self.handle_command(command).await,
            OrchestratorInput::Channel { generation, event } => {
                self.handle_channel_event(generation, event).await
            }
            OrchestratorInput::Peer { attempt, event } => {
                self.handle_peer_event(attempt, event).await
            }
        }
        true
    }

    async fn handle_command(&mut self, command: CallCommand) -> bool {
        match command {
            CallCommand::Connect { reply } => respond(reply, self.connect().await),
            CallCommand::Disconnect { reply } => {
                self.disconnect().await;
                respond(reply, Ok(()));
            }
            CallCommand::StartCall { reply } => respond(reply, self.start_call().await),
            CallCommand::EndCall { reply } => respond(reply, self.end_call().await),
            CallCommand::ToggleMute { reply } => respond(reply, self.toggle_mute().await),
            CallCommand::SetVideoEnabled { enabled, reply } => {
                respond(reply, self.set_video_enabled(enabled).await)
            }
            CallCommand::ToggleSpeaker { reply } => respond(reply, self.toggle_speaker().await),
            CallCommand::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    // ---- relay channel ----

    /// Opens the relay channel if it is not open yet.
    pub async fn connect(&mut self) -> Result<(), CallError> {
        match self.channel.open(&self.config.relay_address).await {
            Ok(ChannelOpen::AlreadyOpen) => Ok(()),
            Ok(ChannelOpen::Opened(events)) => {
                self.channel_generation += 1;
                self.spawn_channel_pump(self.channel_generation, events);
                Ok(())
            }
            Err(e) => {
                error!("Failed to open relay channel: {e}");
                self.publish_error(&e);
                Err(e)
            }
        }
    }

    /// Closes the relay channel. An active media session is left running.
    pub async fn disconnect(&mut self) {
        self.channel.close().await;
    }

    fn spawn_channel_pump(&self, generation: u64, mut events: mpsc::Receiver<ChannelEvent>) {
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(tx) = inbox.upgrade() else { break };
                if tx
                    .send(OrchestratorInput::Channel { generation, event })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    async fn handle_channel_event(&mut self, generation: u64, event: ChannelEvent) {
        if generation != self.channel_generation {
            debug!("Discarding event from closed relay channel: {event:?}");
            return;
        }
        match event {
            ChannelEvent::Message(message) => self.handle_signaling(message).await,
            ChannelEvent::SendFailed(reason) => {
                self.publish(CallErrorKind::SendFailed, reason);
            }
            ChannelEvent::Closed => {
                warn!("Relay connection lost in state {}", self.state);
                self.channel.mark_closed();
                self.publish(CallErrorKind::RelayLost, "relay connection lost");
            }
        }
    }

    async fn handle_signaling(&mut self, message: SignalingMessage) {
        match message {
            SignalingMessage::Offer { sdp } => {
                self.on_remote_offer(SessionDescription::offer(sdp)).await
            }
            SignalingMessage::Answer { sdp } => {
                self.on_remote_answer(SessionDescription::answer(sdp)).await
            }
            SignalingMessage::Candidate { candidate } => self.on_remote_candidate(candidate).await,
        }
    }

    // ---- outgoing calls ----

    pub async fn start_call(&mut self) -> Result<(), CallError> {
        if !self.can_begin_attempt() {
            warn!("Start call rejected in state {}", self.state);
            return Err(CallError::CallAlreadyActive);
        }
        self.connect().await?;
        self.transition(CallTransition::StartCall)?;

        let discarded = self.early_candidates.clear();
        if discarded > 0 {
            debug!("Discarded {discarded} candidates received before placing the call");
        }

        if let Err(e) = self.originate().await {
            self.fail_attempt(&e).await;
            return Err(e);
        }
        Ok(())
    }

    async fn originate(&mut self) -> Result<(), CallError> {
        self.begin_attempt(CallDirection::Outgoing).await?;
        let offer = self.attempt_mut()?.negotiator_mut().create_offer().await?;
        self.send_signal(SignalingMessage::from_description(&offer))
            .await;
        self.transition(CallTransition::OfferSent)?;
        Ok(())
    }

    async fn on_remote_answer(&mut self, answer: SessionDescription) {
        let awaiting = matches!(
            self.state,
            LifecycleState::Originating | LifecycleState::AwaitingAnswer
        );
        let Some(attempt) = self.attempt.as_mut().filter(|_| awaiting) else {
            warn!("Ignoring remote answer in state {}", self.state);
            self.publish(
                CallErrorKind::InvalidState,
                format!("answer received in state {}", self.state),
            );
            return;
        };

        if let Err(e) = attempt.apply_remote_description(answer).await {
            self.fail_attempt(&e).await;
            return;
        }
        if let Err(e) = self.transition(CallTransition::AnswerApplied) {
            warn!("{e}");
        }
    }

    // ---- incoming calls ----

    async fn on_remote_offer(&mut self, offer: SessionDescription) {
        if !self.can_begin_attempt() {
            warn!("Ignoring remote offer in state {}", self.state);
            self.publish(
                CallErrorKind::CallAlreadyActive,
                "remote offer received while a call is in progress",
            );
            return;
        }
        if let Err(e) = self.transition(CallTransition::OfferReceived) {
            warn!("{e}");
            return;
        }
        if let Err(e) = self.answer(offer).await {
            self.fail_attempt(&e).await;
        }
    }

    async fn answer(&mut self, offer: SessionDescription) -> Result<(), CallError> {
        self.begin_attempt(CallDirection::Incoming).await?;

        let early = self.early_candidates.take_pending();
        let attempt = self.attempt_mut()?;
        if !early.is_empty() {
            debug!("Adopting {} candidates received before the offer", early.len());
        }
        for candidate in early {
            attempt.offer_candidate(candidate).await;
        }

        attempt.apply_remote_description(offer).await?;
        let answer = attempt.negotiator_mut().create_answer().await?;
        self.send_signal(SignalingMessage::from_description(&answer))
            .await;
        self.transition(CallTransition::AnswerSent)?;
        Ok(())
    }

    async fn on_remote_candidate(&mut self, candidate: ConnectivityCandidate) {
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.offer_candidate(candidate).await;
        } else if self.state == LifecycleState::Idle {
            debug!("Holding remote candidate until an offer arrives");
            self.early_candidates.offer(candidate);
        } else {
            debug!(
                "Discarding remote candidate received in state {}",
                self.state
            );
        }
    }

    // ---- attempt lifecycle ----

    fn can_begin_attempt(&self) -> bool {
        self.attempt.is_none() && self.state.can_start()
    }

    fn attempt_mut(&mut self) -> Result<&mut CallAttempt, CallError> {
        self.attempt
            .as_mut()
            .ok_or_else(|| CallError::InvalidState("no call in progress".into()))
    }

    fn session_config(&self) -> PeerSessionConfig {
        PeerSessionConfig {
            ice_servers: self.config.ice_servers.clone(),
            capture: self.config.media.capture,
        }
    }

    /// Creates the peer session and installs the new attempt before preparing
    /// its media, so a failure below still leaves it to be torn down.
    async fn begin_attempt(&mut self, direction: CallDirection) -> Result<(), CallError> {
        let id = AttemptId(self.next_attempt);
        self.next_attempt += 1;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = self
            .peer_factory
            .create_session(&self.session_config(), events_tx)
            .await?;
        let pump = self.spawn_peer_pump(id, events_rx);
        self.attempt = Some(CallAttempt::new(
            id,
            direction,
            SessionNegotiator::new(session),
            pump,
        ));

        let media = self.config.media.clone();
        let flags = self.flags;
        let negotiator = self.attempt_mut()?.negotiator_mut();
        negotiator.attach_local_media(&media).await?;
        if flags.muted {
            negotiator
                .set_local_media_enabled(MediaKind::Audio, false)
                .await?;
        }
        if !flags.video_enabled {
            negotiator
                .set_local_media_enabled(MediaKind::Video, false)
                .await?;
        }
        Ok(())
    }

    fn spawn_peer_pump(
        &self,
        attempt: AttemptId,
        mut events: mpsc::UnboundedReceiver<PeerEvent>,
    ) -> JoinHandle<()> {
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(tx) = inbox.upgrade() else { break };
                if tx
                    .send(OrchestratorInput::Peer { attempt, event })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        })
    }

    async fn teardown_attempt(&mut self) {
        if let Some(mut attempt) = self.attempt.take() {
            attempt.close().await;
        }
        self.early_candidates.clear();
    }

    /// Aborts the current attempt after a negotiation error.
    async fn fail_attempt(&mut self, err: &CallError) {
        error!("Call attempt failed: {err}");
        self.teardown_attempt().await;
        if let Err(e) = self.transition(CallTransition::NegotiationFailed) {
            warn!("{e}");
        }
        self.publish_error(err);
    }

    async fn handle_peer_event(&mut self, id: AttemptId, event: PeerEvent) {
        if self.attempt.as_ref().map(CallAttempt::id) != Some(id) {
            debug!("Discarding {event:?} from finished attempt {id}");
            return;
        }
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                self.send_signal(SignalingMessage::candidate(candidate))
                    .await
            }
            PeerEvent::RemoteTrackAttached(kind) => {
                info!("Remote {kind} track attached");
                EventBus::emit(&self.events.remote_track, RemoteTrackAttached { kind });
            }
            PeerEvent::ConnectionStateChanged(state) => self.on_peer_state(state).await,
        }
    }

    async fn on_peer_state(&mut self, state: PeerConnectionState) {
        debug!("Peer connection state: {state:?}");
        match state {
            PeerConnectionState::Connected => {
                if let Some(attempt) = self.attempt.as_mut() {
                    attempt.mark_connected();
                }
                if !self.state.is_active() {
                    if let Err(e) = self.transition(CallTransition::TransportConnected) {
                        warn!("{e}");
                    }
                }
            }
            PeerConnectionState::Disconnected | PeerConnectionState::Closed => {
                self.teardown_attempt().await;
                if let Err(e) = self.transition(CallTransition::TransportDisconnected) {
                    warn!("{e}");
                }
            }
            PeerConnectionState::Failed => {
                self.teardown_attempt().await;
                if let Err(e) = self.transition(CallTransition::TransportFailed) {
                    warn!("{e}");
                }
                self.publish(CallErrorKind::TransportFailed, "peer connection failed");
            }
            PeerConnectionState::New | PeerConnectionState::Checking => {}
        }
    }

    pub async fn end_call(&mut self) -> Result<(), CallError> {
        if self.attempt.is_none() {
            return Err(CallError::InvalidState(format!(
                "no call to end in state {}",
                self.state
            )));
        }
        self.transition(CallTransition::EndRequested)?;
        self.teardown_attempt().await;
        self.transition(CallTransition::Closed)?;
        Ok(())
    }

    // ---- controls ----

    /// Flips the mute flag. The flag only changes if the track toggle succeeds.
    pub async fn toggle_mute(&mut self) -> Result<bool, CallError> {
        let muted = !self.flags.muted;
        self.set_media_enabled(MediaKind::Audio, !muted).await?;
        self.update_flags(|flags| flags.muted = muted);
        info!("Microphone {}", if muted { "muted" } else { "unmuted" });
        Ok(muted)
    }

    pub async fn set_video_enabled(&mut self, enabled: bool) -> Result<(), CallError> {
        self.set_media_enabled(MediaKind::Video, enabled).await?;
        self.update_flags(|flags| flags.video_enabled = enabled);
        Ok(())
    }

    async fn set_media_enabled(&mut self, kind: MediaKind, enabled: bool) -> Result<(), CallError> {
        let Some(attempt) = self.attempt.as_ref() else {
            // Remembered for the next attempt.
            return Ok(());
        };
        if let Err(e) = attempt
            .negotiator()
            .set_local_media_enabled(kind, enabled)
            .await
        {
            error!("Failed to set {kind} enabled={enabled}: {e}");
            self.publish(CallErrorKind::MediaToggle, e.to_string());
            return Err(e);
        }
        Ok(())
    }

    pub async fn toggle_speaker(&mut self) -> Result<bool, CallError> {
        let route = self.current_route().toggled();
        if let Err(e) = self.audio_router.set_route(route).await {
            let err = CallError::AudioRoute(e.to_string());
            self.publish_error(&err);
            return Err(err);
        }
        let speaker_on = route.is_speaker();
        self.update_flags(|flags| flags.speaker_on = speaker_on);
        Ok(speaker_on)
    }

    fn current_route(&self) -> AudioRoute {
        if self.flags.speaker_on {
            AudioRoute::Speaker
        } else {
            AudioRoute::Earpiece
        }
    }

    /// Ends any call in progress and closes the relay channel.
    pub async fn shutdown(&mut self) {
        if self.attempt.is_some() {
            if let Err(e) = self.end_call().await {
                warn!("Failed to end call during shutdown: {e}");
                self.teardown_attempt().await;
            }
        }
        self.channel.close().await;
    }

    // ---- observers ----

    /// Sends one frame; a closed relay channel surfaces as a `SendFailed` event.
    async fn send_signal(&self, message: SignalingMessage) {
        if let Err(e) = self.channel.send(&message).await {
            warn!("Dropping outbound {} frame: {e}", message.kind());
            self.publish(
                CallErrorKind::SendFailed,
                format!("{} frame not sent: {e}", message.kind()),
            );
        }
    }

    fn transition(&mut self, transition: CallTransition) -> Result<LifecycleState, InvalidTransition> {
        let from = self.state;
        let to = from.next(transition)?;
        if from != to {
            info!("Call state {from} -> {to} ({})", to.label());
            self.state = to;
            self.state_tx.send_replace(to);
            EventBus::emit(&self.events.state_changed, StateChanged { from, to });
        }
        Ok(to)
    }

    fn update_flags(&mut self, update: impl FnOnce(&mut CallFlags)) {
        update(&mut self.flags);
        self.flags_tx.send_replace(self.flags);
    }

    fn publish(&self, kind: CallErrorKind, message: impl Into<String>) {
        EventBus::emit(&self.events.error, CallErrorEvent::new(kind, message));
    }

    fn publish_error(&self, err: &CallError) {
        self.publish(err.kind(), err.to_string());
    }
}

fn respond<T>(reply: Reply<T>, result: Result<T, CallError>) {
    if reply.send(result).is_err() {
        debug!("Caller dropped before the reply was sent");
    }
}

/// Cloneable handle to a running orchestrator.
#[derive(Clone)]
pub struct CallOrchestrator {
    inbox: mpsc::Sender<OrchestratorInput>,
    state_rx: watch::Receiver<LifecycleState>,
    flags_rx: watch::Receiver<CallFlags>,
    events: Arc<EventBus>,
}

impl CallOrchestrator {
    pub fn builder() -> CallOrchestratorBuilder {
        CallOrchestratorBuilder::new()
    }

    /// Current lifecycle state (last write visible).
    pub fn state(&self) -> LifecycleState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state_rx.clone()
    }

    pub fn flags(&self) -> CallFlags {
        *self.flags_rx.borrow()
    }

    pub fn is_muted(&self) -> bool {
        self.flags().muted
    }

    pub fn is_video_enabled(&self) -> bool {
        self.flags().video_enabled
    }

    pub fn is_speaker_on(&self) -> bool {
        self.flags().speaker_on
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub async fn connect(&self) -> Result<(), CallError> {
        self.request(|reply| CallCommand::Connect { reply }).await
    }

    pub async fn disconnect(&self) -> Result<(), CallError> {
        self.request(|reply| CallCommand::Disconnect { reply }).await
    }

    pub async fn start_call(&self) -> Result<(), CallError> {
        self.request(|reply| CallCommand::StartCall { reply }).await
    }

    pub async fn end_call(&self) -> Result<(), CallError> {
        self.request(|reply| CallCommand::EndCall { reply }).await
    }

    /// Returns the new mute flag.
    pub async fn toggle_mute(&self) -> Result<bool, CallError> {
        self.request(|reply| CallCommand::ToggleMute { reply }).await
    }

    pub async fn set_video_enabled(&self, enabled: bool) -> Result<(), CallError> {
        self.request(|reply| CallCommand::SetVideoEnabled { enabled, reply })
            .await
    }

    /// Returns the new speaker flag.
    pub async fn toggle_speaker(&self) -> Result<bool, CallError> {
        self.request(|reply| CallCommand::ToggleSpeaker { reply })
            .await
    }

    /// Ends any call, closes the relay channel and stops the actor.
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        let command = OrchestratorInput::Command(CallCommand::Shutdown { reply });
        if self.inbox.send(command).await.is_ok() {
            let _ = done.await;
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> CallCommand,
    ) -> Result<T, CallError> {
        let (reply, response) = oneshot::channel();
        self.inbox
            .send(OrchestratorInput::Command(command(reply)))
            .await
            .map_err(|_| CallError::OrchestratorStopped)?;
        response.await.map_err(|_| CallError::OrchestratorStopped)?
    }
}

pub struct CallOrchestratorBuilder {
    config: Option<CallConfig>,
    transport_factory: Option<Arc<dyn TransportFactory>>,
    peer_factory: Option<Arc<dyn PeerSessionFactory>>,
    audio_router: Option<Arc<dyn AudioRouter>>,
}

impl CallOrchestratorBuilder {
    fn new() -> Self {
        Self {
            config: None,
            transport_factory: None,
            peer_factory: None,
            audio_router: None,
        }
    }

    pub fn with_config(mut self, config: CallConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Overrides the relay transport (defaults to the tokio WebSocket transport).
    pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    pub fn with_peer_factory(mut self, factory: Arc<dyn PeerSessionFactory>) -> Self {
        self.peer_factory = Some(factory);
        self
    }

    pub fn with_audio_router(mut self, router: Arc<dyn AudioRouter>) -> Self {
        self.audio_router = Some(router);
        self
    }

    /// Validates the configuration and spawns the actor on the current runtime.
    pub async fn build(self) -> anyhow::Result<CallOrchestrator> {
        let config = self
            .config
            .ok_or_else(|| anyhow::anyhow!("Call config is required. Use with_config()."))?;
        config.validate()?;
        let peer_factory = self.peer_factory.ok_or_else(|| {
            anyhow::anyhow!("Peer session factory is required. Use with_peer_factory().")
        })?;
        let transport_factory = self
            .transport_factory
            .unwrap_or_else(|| Arc::new(TokioWebSocketTransportFactory::new()));
        let audio_router = self
            .audio_router
            .unwrap_or_else(|| Arc::new(NoopAudioRouter));

        let events = Arc::new(EventBus::new());
        let (actor, inbox, inbox_rx) = Orchestrator::new(
            config,
            transport_factory,
            peer_factory,
            audio_router,
            events.clone(),
        );
        let handle = CallOrchestrator {
            inbox,
            state_rx: actor.subscribe_state(),
            flags_rx: actor.subscribe_flags(),
            events,
        };
        tokio::spawn(actor.run(inbox_rx));
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::mock::{FailPoint, PeerCall};
    use crate::test_utils::{TestHarness, test_config};
    use crate::transport::mock::MockRelay;
    use crate::peer::mock::MockPeer;
    use std::time::Duration;

    fn offer(sdp: &str) -> SignalingMessage {
        SignalingMessage::Offer { sdp: sdp.into() }
    }

    fn answer(sdp: &str) -> SignalingMessage {
        SignalingMessage::Answer { sdp: sdp.into() }
    }

    fn candidate(n: u16) -> ConnectivityCandidate {
        ConnectivityCandidate::new(format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000 typ host"), "0", 0)
    }

    fn kinds(errors: &[CallErrorEvent]) -> Vec<CallErrorKind> {
        errors.iter().map(|e| e.kind).collect()
    }

    async fn active_outgoing_call() -> TestHarness {
        let mut h = TestHarness::new();
        h.orchestrator.start_call().await.unwrap();
        h.remote(answer("A1")).await;
        assert_eq!(h.orchestrator.state(), LifecycleState::Active);
        h.peer.clear_calls();
        h.relay.clear_sent();
        h.take_state_changes();
        h
    }

    /// Start call → offer O1 sent → answer A1 received → transport connected ⇒ Active
    #[tokio::test]
    async fn test_outgoing_call_reaches_active() {
        let mut h = TestHarness::new();

        h.orchestrator.start_call().await.unwrap();
        assert_eq!(h.orchestrator.state(), LifecycleState::AwaitingAnswer);
        assert_eq!(h.relay.sent(), vec![r#"{"type":"offer","sdp":"O1"}"#.to_string()]);

        h.remote(answer("A1")).await;
        assert_eq!(h.orchestrator.state(), LifecycleState::Active);

        h.peer_event(PeerEvent::ConnectionStateChanged(PeerConnectionState::Connected))
            .await;
        assert_eq!(h.orchestrator.state(), LifecycleState::Active);
        assert!(
            h.orchestrator
                .current_attempt()
                .and_then(CallAttempt::connected_at)
                .is_some()
        );

        assert_eq!(
            h.peer.calls(),
            vec![
                PeerCall::AddTrack(MediaKind::Audio),
                PeerCall::AddTrack(MediaKind::Video),
                PeerCall::CreateOffer,
                PeerCall::SetLocal(SessionDescription::offer("O1")),
                PeerCall::SetRemote(SessionDescription::answer("A1")),
            ]
        );
        let path: Vec<_> = h.take_state_changes().iter().map(|c| c.to).collect();
        assert_eq!(
            path,
            vec![
                LifecycleState::Originating,
                LifecycleState::AwaitingAnswer,
                LifecycleState::Active,
            ]
        );
    }

    #[tokio::test]
    async fn test_session_config_comes_from_call_config() {
        let mut config = test_config();
        config.ice_servers = vec!["stun:one".into(), "turn:two".into()];
        let mut h = TestHarness::with_config(config);

        h.orchestrator.start_call().await.unwrap();
        let session_config = h.peer.last_config().unwrap();
        assert_eq!(session_config.ice_servers, vec!["stun:one", "turn:two"]);
        assert!(session_config.capture.is_some());
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_and_attempt_untouched() {
        let mut h = TestHarness::new();
        h.orchestrator.start_call().await.unwrap();
        let first = h.orchestrator.current_attempt().map(CallAttempt::id);

        let err = h.orchestrator.start_call().await.unwrap_err();
        assert!(matches!(err, CallError::CallAlreadyActive));
        assert_eq!(h.orchestrator.state(), LifecycleState::AwaitingAnswer);
        assert_eq!(h.orchestrator.current_attempt().map(CallAttempt::id), first);
        assert_eq!(h.peer.sessions_created(), 1);

        h.remote(answer("A1")).await;
        assert!(matches!(
            h.orchestrator.start_call().await,
            Err(CallError::CallAlreadyActive)
        ));
    }

    #[tokio::test]
    async fn test_answer_without_offer_is_ignored() {
        let mut h = TestHarness::new();
        h.orchestrator.connect().await.unwrap();

        h.remote(answer("A1")).await;

        assert_eq!(h.orchestrator.state(), LifecycleState::Idle);
        assert!(h.peer.calls().is_empty());
        assert_eq!(kinds(&h.take_errors()), vec![CallErrorKind::InvalidState]);
    }

    /// Remote offer with no prior candidates ⇒ answer sent, later candidates go straight through.
    #[tokio::test]
    async fn test_incoming_offer_is_answered() {
        let mut h = TestHarness::new();
        h.orchestrator.connect().await.unwrap();

        h.remote(offer("O1")).await;
        assert_eq!(h.orchestrator.state(), LifecycleState::Active);
        assert_eq!(h.relay.sent(), vec![r#"{"type":"answer","sdp":"A1"}"#.to_string()]);
        assert_eq!(
            h.orchestrator.current_attempt().map(CallAttempt::direction),
            Some(CallDirection::Incoming)
        );

        h.remote(SignalingMessage::candidate(candidate(1))).await;
        assert_eq!(
            h.peer.calls(),
            vec![
                PeerCall::AddTrack(MediaKind::Audio),
                PeerCall::AddTrack(MediaKind::Video),
                PeerCall::SetRemote(SessionDescription::offer("O1")),
                PeerCall::CreateAnswer,
                PeerCall::SetLocal(SessionDescription::answer("A1")),
                PeerCall::AddCandidate(candidate(1)),
            ]
        );
        let path: Vec<_> = h.take_state_changes().iter().map(|c| c.to).collect();
        assert_eq!(
            path,
            vec![LifecycleState::Negotiating, LifecycleState::Active]
        );
    }

    /// Three candidates before any description ⇒ three adds, in order, after one remote description.
    #[tokio::test]
    async fn test_candidates_before_offer_are_held_until_applied() {
        let mut h = TestHarness::new();
        h.orchestrator.connect().await.unwrap();

        for n in 1..=3 {
            h.remote(SignalingMessage::candidate(candidate(n))).await;
        }
        assert!(h.peer.calls().is_empty());

        h.remote(offer("O1")).await;

        let calls = h.peer.calls();
        let set_remote_at = calls
            .iter()
            .position(|c| matches!(c, PeerCall::SetRemote(_)))
            .unwrap();
        let adds: Vec<_> = calls
            .iter()
            .enumerate()
            .filter_map(|(i, c)| match c {
                PeerCall::AddCandidate(c) => Some((i, c.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(h.peer.count(|c| matches!(c, PeerCall::SetRemote(_))), 1);
        assert_eq!(adds.len(), 3);
        assert!(adds.iter().all(|(i, _)| *i > set_remote_at));
        assert_eq!(
            adds.into_iter().map(|(_, c)| c).collect::<Vec<_>>(),
            vec![candidate(1), candidate(2), candidate(3)]
        );
    }

    #[tokio::test]
    async fn test_candidates_before_answer_wait_for_it() {
        let mut h = TestHarness::new();
        h.orchestrator.start_call().await.unwrap();
        h.peer.clear_calls();

        h.remote(SignalingMessage::candidate(candidate(1))).await;
        h.remote(SignalingMessage::candidate(candidate(2))).await;
        assert!(h.peer.calls().is_empty());

        h.remote(answer("A1")).await;
        assert_eq!(
            h.peer.calls(),
            vec![
                PeerCall::SetRemote(SessionDescription::answer("A1")),
                PeerCall::AddCandidate(candidate(1)),
                PeerCall::AddCandidate(candidate(2)),
            ]
        );
    }

    #[tokio::test]
    async fn test_early_candidates_discarded_when_placing_call() {
        let mut h = TestHarness::new();
        h.orchestrator.connect().await.unwrap();
        h.remote(SignalingMessage::candidate(candidate(1))).await;

        h.orchestrator.start_call().await.unwrap();
        h.remote(answer("A1")).await;

        assert_eq!(h.peer.count(|c| matches!(c, PeerCall::AddCandidate(_))), 0);
    }

    #[tokio::test]
    async fn test_candidates_after_call_ended_are_not_applied_to_next_call() {
        let mut h = active_outgoing_call().await;
        h.orchestrator.end_call().await.unwrap();
        h.peer.clear_calls();

        h.remote(SignalingMessage::candidate(candidate(7))).await;
        h.remote(offer("O2")).await;

        assert_eq!(h.orchestrator.state(), LifecycleState::Active);
        assert_eq!(h.peer.count(|c| matches!(c, PeerCall::AddCandidate(_))), 0);
    }

    #[tokio::test]
    async fn test_candidates_after_failure_are_discarded() {
        let mut h = TestHarness::new();
        h.peer.fail_at(FailPoint::CreateAnswer);
        h.orchestrator.connect().await.unwrap();
        h.remote(offer("O1")).await;
        assert_eq!(h.orchestrator.state(), LifecycleState::Failed);

        h.peer.succeed_at(FailPoint::CreateAnswer);
        h.remote(SignalingMessage::candidate(candidate(9))).await;
        h.remote(offer("O2")).await;

        assert_eq!(h.orchestrator.state(), LifecycleState::Active);
        assert_eq!(h.peer.count(|c| matches!(c, PeerCall::AddCandidate(_))), 0);
    }

    #[tokio::test]
    async fn test_idle_candidate_hold_is_capped() {
        let mut h = TestHarness::new();
        h.orchestrator.connect().await.unwrap();

        let total = MAX_EARLY_CANDIDATES as u16 + 5;
        for n in 1..=total {
            h.remote(SignalingMessage::candidate(candidate(n))).await;
        }
        h.remote(offer("O1")).await;

        let added: Vec<_> = h
            .peer
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                PeerCall::AddCandidate(c) => Some(c),
                _ => None,
            })
            .collect();
        let expected: Vec<_> = (6..=total).map(candidate).collect();
        assert_eq!(added.len(), MAX_EARLY_CANDIDATES);
        assert_eq!(added, expected);
    }

    #[tokio::test]
    async fn test_create_answer_failure_fails_attempt_and_closes_once() {
        let mut h = TestHarness::new();
        h.peer.fail_at(FailPoint::CreateAnswer);
        h.orchestrator.connect().await.unwrap();

        h.remote(offer("O1")).await;

        assert_eq!(h.orchestrator.state(), LifecycleState::Failed);
        assert!(h.orchestrator.current_attempt().is_none());
        assert_eq!(h.peer.count(|c| *c == PeerCall::Close), 1);
        assert!(h.relay.sent().is_empty());
        assert_eq!(kinds(&h.take_errors()), vec![CallErrorKind::Negotiation]);

        // Recovery is a fresh attempt.
        h.peer.succeed_at(FailPoint::CreateAnswer);
        h.remote(offer("O2")).await;
        assert_eq!(h.orchestrator.state(), LifecycleState::Active);
        assert_eq!(h.peer.sessions_created(), 2);
    }

    #[tokio::test]
    async fn test_rejected_answer_fails_outgoing_call() {
        let mut h = TestHarness::new();
        h.peer.fail_at(FailPoint::SetRemote);
        h.orchestrator.start_call().await.unwrap();

        h.remote(answer("garbage")).await;
        assert_eq!(h.orchestrator.state(), LifecycleState::Failed);
        assert_eq!(h.peer.count(|c| *c == PeerCall::Close), 1);

        h.peer.succeed_at(FailPoint::SetRemote);
        h.orchestrator.start_call().await.unwrap();
        assert_eq!(h.orchestrator.state(), LifecycleState::AwaitingAnswer);
    }

    #[tokio::test]
    async fn test_offer_failure_returns_error_and_fails() {
        let mut h = TestHarness::new();
        h.peer.fail_at(FailPoint::CreateOffer);

        let err = h.orchestrator.start_call().await.unwrap_err();
        assert!(matches!(err, CallError::Negotiation(_)));
        assert_eq!(h.orchestrator.state(), LifecycleState::Failed);
        assert_eq!(h.peer.count(|c| *c == PeerCall::Close), 1);
        assert!(h.relay.sent().is_empty());
    }

    #[tokio::test]
    async fn test_offer_during_call_is_ignored() {
        let mut h = active_outgoing_call().await;

        h.remote(offer("O9")).await;
        assert_eq!(h.orchestrator.state(), LifecycleState::Active);
        assert_eq!(h.peer.sessions_created(), 1);
        assert!(h.peer.calls().is_empty());
        assert_eq!(kinds(&h.take_errors()), vec![CallErrorKind::CallAlreadyActive]);
    }

    #[tokio::test]
    async fn test_duplicate_answer_is_ignored() {
        let mut h = active_outgoing_call().await;
        h.remote(answer("A1")).await;
        assert_eq!(h.orchestrator.state(), LifecycleState::Active);
        assert!(h.peer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_local_candidates_are_sent() {
        let mut h = active_outgoing_call().await;

        h.peer_event(PeerEvent::LocalCandidate(ConnectivityCandidate::new(
            "local", "0", 0,
        )))
        .await;
        assert_eq!(
            h.relay.sent(),
            vec![
                r#"{"type":"candidate","candidate":{"candidate":"local","sdpMid":"0","sdpMLineIndex":0}}"#
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_remote_track_is_published() {
        let mut h = active_outgoing_call().await;
        let mut tracks = h.events.remote_track.subscribe();

        h.peer_event(PeerEvent::RemoteTrackAttached(MediaKind::Video))
            .await;
        assert_eq!(tracks.recv().await.unwrap().kind, MediaKind::Video);
    }

    #[tokio::test]
    async fn test_transport_disconnect_ends_call() {
        let mut h = active_outgoing_call().await;

        h.peer_event(PeerEvent::ConnectionStateChanged(
            PeerConnectionState::Disconnected,
        ))
        .await;
        assert_eq!(h.orchestrator.state(), LifecycleState::Ended);
        assert_eq!(h.orchestrator.state().label(), "Ended");
        assert!(h.orchestrator.current_attempt().is_none());
        assert_eq!(h.peer.count(|c| *c == PeerCall::Close), 1);
        assert!(h.take_errors().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_fails_call() {
        let mut h = active_outgoing_call().await;

        h.peer_event(PeerEvent::ConnectionStateChanged(PeerConnectionState::Failed))
            .await;
        assert_eq!(h.orchestrator.state(), LifecycleState::Failed);
        assert_eq!(h.peer.count(|c| *c == PeerCall::Close), 1);
        assert_eq!(kinds(&h.take_errors()), vec![CallErrorKind::TransportFailed]);
    }

    #[tokio::test]
    async fn test_end_call_then_late_events_are_discarded() {
        let mut h = active_outgoing_call().await;
        let ended = h.orchestrator.current_attempt().map(CallAttempt::id).unwrap();

        h.orchestrator.end_call().await.unwrap();
        assert_eq!(h.orchestrator.state(), LifecycleState::Ended);
        assert_eq!(h.peer.count(|c| *c == PeerCall::Close), 1);
        let path: Vec<_> = h.take_state_changes().iter().map(|c| c.to).collect();
        assert_eq!(path, vec![LifecycleState::Ending, LifecycleState::Ended]);

        // The relay stays open after hanging up.
        assert_eq!(h.relay.disconnect_count(), 0);

        let stale = OrchestratorInput::Peer {
            attempt: ended,
            event: PeerEvent::LocalCandidate(ConnectivityCandidate::new("late", "0", 0)),
        };
        assert!(h.orchestrator.dispatch(stale).await);
        let stale = OrchestratorInput::Peer {
            attempt: ended,
            event: PeerEvent::ConnectionStateChanged(PeerConnectionState::Failed),
        };
        h.orchestrator.dispatch(stale).await;
        assert!(h.relay.sent().is_empty());
        assert_eq!(h.orchestrator.state(), LifecycleState::Ended);

        // A new call gets a new attempt id.
        h.orchestrator.start_call().await.unwrap();
        let next = h.orchestrator.current_attempt().map(CallAttempt::id).unwrap();
        assert!(next > ended);
        assert_eq!(h.peer.sessions_created(), 2);
    }

    #[tokio::test]
    async fn test_end_call_without_call_is_invalid() {
        let mut h = TestHarness::new();
        assert!(matches!(
            h.orchestrator.end_call().await,
            Err(CallError::InvalidState(_))
        ));
    }

    /// Toggling mute twice restores the flag with two alternating track toggles.
    #[tokio::test]
    async fn test_toggle_mute_twice() {
        let mut h = active_outgoing_call().await;

        assert!(h.orchestrator.toggle_mute().await.unwrap());
        assert!(h.orchestrator.flags().muted);
        assert!(!h.orchestrator.toggle_mute().await.unwrap());
        assert!(!h.orchestrator.flags().muted);

        assert_eq!(
            h.peer.calls(),
            vec![
                PeerCall::SetTrackEnabled(MediaKind::Audio, false),
                PeerCall::SetTrackEnabled(MediaKind::Audio, true),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_mute_leaves_flag() {
        let mut h = active_outgoing_call().await;
        h.peer.fail_at(FailPoint::SetTrackEnabled);

        assert!(h.orchestrator.toggle_mute().await.is_err());
        assert!(!h.orchestrator.flags().muted);
        assert_eq!(kinds(&h.take_errors()), vec![CallErrorKind::MediaToggle]);

        assert!(h.orchestrator.set_video_enabled(false).await.is_err());
        assert!(h.orchestrator.flags().video_enabled);
    }

    #[tokio::test]
    async fn test_preferences_apply_to_next_attempt() {
        let mut h = TestHarness::new();
        assert!(h.orchestrator.toggle_mute().await.unwrap());
        h.orchestrator.set_video_enabled(false).await.unwrap();
        assert!(h.peer.calls().is_empty());

        h.orchestrator.start_call().await.unwrap();
        assert_eq!(
            &h.peer.calls()[..4],
            &[
                PeerCall::AddTrack(MediaKind::Audio),
                PeerCall::AddTrack(MediaKind::Video),
                PeerCall::SetTrackEnabled(MediaKind::Audio, false),
                PeerCall::SetTrackEnabled(MediaKind::Video, false),
            ]
        );
    }

    #[tokio::test]
    async fn test_audio_only_call_has_no_video_track() {
        let mut config = test_config();
        config.media = crate::config::MediaConfig::audio_only();
        let mut h = TestHarness::with_config(config);

        h.orchestrator.start_call().await.unwrap();
        h.orchestrator.set_video_enabled(false).await.unwrap();
        assert_eq!(h.peer.count(|c| *c == PeerCall::AddTrack(MediaKind::Video)), 0);
        assert_eq!(
            h.peer
                .count(|c| matches!(c, PeerCall::SetTrackEnabled(MediaKind::Video, _))),
            0
        );
    }

    #[tokio::test]
    async fn test_toggle_speaker_goes_through_router() {
        let mut h = TestHarness::new();

        assert!(h.orchestrator.toggle_speaker().await.unwrap());
        assert!(!h.orchestrator.toggle_speaker().await.unwrap());
        assert_eq!(
            *h.audio.routes.lock().unwrap(),
            vec![AudioRoute::Speaker, AudioRoute::Earpiece]
        );

        *h.audio.fail.lock().unwrap() = true;
        assert!(matches!(
            h.orchestrator.toggle_speaker().await,
            Err(CallError::AudioRoute(_))
        ));
        assert!(!h.orchestrator.flags().speaker_on);
        assert_eq!(kinds(&h.take_errors()), vec![CallErrorKind::AudioRoute]);
    }

    #[tokio::test]
    async fn test_unreachable_relay_blocks_start() {
        let mut h = TestHarness::new();
        h.relay.set_fail_connect(true);

        let err = h.orchestrator.start_call().await.unwrap_err();
        assert!(matches!(err, CallError::ChannelUnavailable(_)));
        assert_eq!(h.orchestrator.state(), LifecycleState::Idle);
        assert_eq!(h.peer.sessions_created(), 0);
        assert_eq!(kinds(&h.take_errors()), vec![CallErrorKind::ChannelUnavailable]);
    }

    #[tokio::test]
    async fn test_send_failure_is_reported_not_fatal() {
        let mut h = TestHarness::new();
        h.orchestrator.connect().await.unwrap();
        h.relay.set_fail_send(true);

        h.orchestrator.start_call().await.unwrap();
        h.pump().await;

        assert_eq!(h.orchestrator.state(), LifecycleState::AwaitingAnswer);
        assert_eq!(kinds(&h.take_errors()), vec![CallErrorKind::SendFailed]);
    }

    #[tokio::test]
    async fn test_local_candidate_after_disconnect_is_reported() {
        let mut h = active_outgoing_call().await;
        h.orchestrator.disconnect().await;

        h.peer_event(PeerEvent::LocalCandidate(ConnectivityCandidate::new(
            "local", "0", 0,
        )))
        .await;

        assert!(h.relay.sent().is_empty());
        assert_eq!(kinds(&h.take_errors()), vec![CallErrorKind::SendFailed]);
        assert_eq!(h.orchestrator.state(), LifecycleState::Active);
    }

    #[tokio::test]
    async fn test_relay_loss_is_reported_and_reconnect_is_explicit() {
        let mut h = active_outgoing_call().await;

        h.relay.drop_connection().await;
        h.pump().await;

        assert_eq!(kinds(&h.take_errors()), vec![CallErrorKind::RelayLost]);
        // The media session is not torn down by the relay going away.
        assert_eq!(h.orchestrator.state(), LifecycleState::Active);
        assert_eq!(h.relay.connect_count(), 1);

        h.orchestrator.connect().await.unwrap();
        assert_eq!(h.relay.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_ends_call_and_closes_relay() {
        let mut h = active_outgoing_call().await;

        assert!(
            !h.orchestrator
                .dispatch(OrchestratorInput::Command(CallCommand::Shutdown {
                    reply: oneshot::channel().0,
                }))
                .await
        );
        assert_eq!(h.orchestrator.state(), LifecycleState::Ended);
        assert_eq!(h.peer.count(|c| *c == PeerCall::Close), 1);
        assert_eq!(h.relay.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_handle_drives_spawned_actor() {
        let relay = MockRelay::new();
        let peer = MockPeer::new();
        let call = CallOrchestrator::builder()
            .with_config(test_config())
            .with_transport_factory(relay.factory())
            .with_peer_factory(peer.factory())
            .build()
            .await
            .unwrap();
        let mut state = call.subscribe_state();

        call.start_call().await.unwrap();
        assert_eq!(call.state(), LifecycleState::AwaitingAnswer);

        relay.deliver_message(&answer("A1")).await;
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == LifecycleState::Active),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(call.toggle_mute().await.unwrap());
        assert!(call.is_muted());

        call.end_call().await.unwrap();
        assert_eq!(call.state(), LifecycleState::Ended);

        call.shutdown().await;
        assert!(matches!(
            call.start_call().await,
            Err(CallError::OrchestratorStopped)
        ));
    }

    #[tokio::test]
    async fn test_builder_requires_peer_factory_and_valid_config() {
        let err = CallOrchestrator::builder()
            .with_config(test_config())
            .build()
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("Peer session factory"));

        let err = CallOrchestrator::builder()
            .with_config(CallConfig::new("http://nope"))
            .with_peer_factory(MockPeer::new().factory())
            .build()
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("ws://"));
    }
}
