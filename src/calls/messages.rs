use super::attempt::AttemptId;
use super::error::CallError;
use crate::channel::ChannelEvent;
use crate::peer::PeerEvent;
use tokio::sync::oneshot;

pub type Reply<T> = oneshot::Sender<Result<T, CallError>>;

/// User intents accepted by the orchestrator.
#[derive(Debug)]
pub enum CallCommand {
    Connect { reply: Reply<()> },
    Disconnect { reply: Reply<()> },
    StartCall { reply: Reply<()> },
    EndCall { reply: Reply<()> },
    /// Replies with the new mute flag.
    ToggleMute { reply: Reply<bool> },
    SetVideoEnabled { enabled: bool, reply: Reply<()> },
    /// Replies with the new speaker flag.
    ToggleSpeaker { reply: Reply<bool> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Everything the orchestrator reacts to, funneled through one queue.
#[derive(Debug)]
pub enum OrchestratorInput {
    Command(CallCommand),
    /// Event from the relay channel opened as `generation`.
    Channel { generation: u64, event: ChannelEvent },
    /// Event from the peer session of `attempt`.
    Peer { attempt: AttemptId, event: PeerEvent },
}
