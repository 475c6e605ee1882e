use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use peercall::calls::media::WebRtcPeerSessionFactory;
use peercall::{CallConfig, CallOrchestrator, MediaConfig};
use peercall::types::events::{CallErrorEvent, RemoteTrackAttached, StateChanged};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

// A small command-line peer: connects to a relay, optionally places a call,
// and logs lifecycle changes until interrupted.
//
// Usage:
//   cargo run --features webrtc -- --relay ws://localhost:8080/ws          # wait for a call
//   cargo run --features webrtc -- --relay ws://localhost:8080/ws --call   # place a call
//   cargo run --features webrtc -- --config call.json --audio-only

#[derive(Debug, Parser)]
#[command(name = "peercall", about = "Peer-to-peer call over a WebSocket signaling relay")]
struct Args {
    /// Relay URL (overrides the config file)
    #[arg(short, long)]
    relay: Option<String>,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// STUN/TURN server URL; may be repeated (overrides the config file)
    #[arg(long = "ice-server")]
    ice_servers: Vec<String>,

    /// Place a call as soon as the relay is connected
    #[arg(long)]
    call: bool,

    /// Do not send video
    #[arg(long)]
    audio_only: bool,
}

fn load_config(args: &Args) -> anyhow::Result<CallConfig> {
    let mut config = match &args.config {
        Some(path) => CallConfig::from_json_file(path)?,
        None => CallConfig::default(),
    };
    if let Some(relay) = &args.relay {
        config.relay_address = relay.clone();
    }
    if !args.ice_servers.is_empty() {
        config.ice_servers = args.ice_servers.clone();
    }
    if args.audio_only {
        config.media = MediaConfig::audio_only();
    }
    config.validate()?;
    Ok(config)
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    rt.block_on(async {
        if let Err(e) = run(config, args.call).await {
            error!("{e}");
        }
    });
}

async fn run(config: CallConfig, place_call: bool) -> anyhow::Result<()> {
    let call = CallOrchestrator::builder()
        .with_config(config)
        .with_peer_factory(Arc::new(WebRtcPeerSessionFactory::new()))
        .build()
        .await?;

    let states = call.events().state_changed.subscribe();
    let tracks = call.events().remote_track.subscribe();
    let errors = call.events().error.subscribe();

    call.connect().await?;
    info!("Connected to relay");

    if place_call {
        call.start_call().await?;
    } else {
        info!("Waiting for an incoming call (Ctrl+C to quit)");
    }

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
        }
    };
    if watch_events(states, tracks, errors, interrupt).await {
        info!("Interrupted, hanging up");
    }

    call.shutdown().await;
    Ok(())
}

/// Logs call events until `interrupt` resolves or the event bus closes.
/// Returns `true` when interrupted.
async fn watch_events(
    mut states: broadcast::Receiver<Arc<StateChanged>>,
    mut tracks: broadcast::Receiver<Arc<RemoteTrackAttached>>,
    mut errors: broadcast::Receiver<Arc<CallErrorEvent>>,
    interrupt: impl Future<Output = ()>,
) -> bool {
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            change = states.recv() => match change {
                Ok(change) => info!("{} -> {}", change.from.label(), change.to.label()),
                Err(RecvError::Lagged(n)) => warn!("Missed {n} state changes"),
                Err(RecvError::Closed) => return false,
            },
            track = tracks.recv() => match track {
                Ok(track) => info!("Receiving remote {}", track.kind),
                Err(RecvError::Lagged(n)) => warn!("Missed {n} track events"),
                Err(RecvError::Closed) => return false,
            },
            err = errors.recv() => match err {
                Ok(err) => warn!("{err}"),
                Err(RecvError::Lagged(n)) => warn!("Missed {n} error events"),
                Err(RecvError::Closed) => return false,
            },
            _ = &mut interrupt => return true,
        }
    }
}
