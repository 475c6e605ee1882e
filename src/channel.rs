//! Signaling channel: the persistent relay connection and the wire codec on top of it.

use crate::calls::CallError;
use crate::protocol::SignalingMessage;
use crate::transport::{Transport, TransportEvent, TransportFactory};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const CHANNEL_EVENT_CAPACITY: usize = 100;

/// Events produced by an open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A decoded frame from the remote peer.
    Message(SignalingMessage),
    /// An outbound frame could not be written.
    SendFailed(String),
    /// The relay connection is gone; no further events follow.
    Closed,
}

/// Result of [`SignalingChannel::open`].
#[derive(Debug)]
pub enum ChannelOpen {
    /// A fresh connection; the receiver carries its inbound events.
    Opened(mpsc::Receiver<ChannelEvent>),
    AlreadyOpen,
}

/// Returned by [`SignalingChannel::send`] when there is no relay connection.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("relay channel is not open")]
pub struct ChannelClosed;

pub struct SignalingChannel {
    factory: Arc<dyn TransportFactory>,
    transport: Option<Arc<dyn Transport>>,
    events_tx: Option<mpsc::Sender<ChannelEvent>>,
    reader: Option<JoinHandle<()>>,
}

impl SignalingChannel {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            transport: None,
            events_tx: None,
            reader: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Connects to the relay at `address`.
    ///
    /// Does nothing if the channel is already open. Each successful open starts
    /// one background receive loop whose events arrive on the returned stream.
    pub async fn open(&mut self, address: &str) -> Result<ChannelOpen, CallError> {
        if self.is_open() {
            debug!("Relay channel already open");
            return Ok(ChannelOpen::AlreadyOpen);
        }

        let (transport, transport_events) = self
            .factory
            .create_transport(address)
            .await
            .map_err(|e| CallError::ChannelUnavailable(e.to_string()))?;

        info!("Relay channel open ({address})");
        let (events_tx, events_rx) = mpsc::channel(CHANNEL_EVENT_CAPACITY);
        self.reader = Some(tokio::spawn(receive_loop(
            transport_events,
            events_tx.clone(),
        )));
        self.transport = Some(transport);
        self.events_tx = Some(events_tx);

        Ok(ChannelOpen::Opened(events_rx))
    }

    /// Encodes and writes one frame.
    ///
    /// Only a missing connection is returned. Encode and write failures are
    /// logged and reported as [`ChannelEvent::SendFailed`] on the inbound stream.
    pub async fn send(&self, message: &SignalingMessage) -> Result<(), ChannelClosed> {
        let transport = self.transport.as_ref().ok_or(ChannelClosed)?;

        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                self.report_send_failure(format!("failed to encode {} frame: {e}", message.kind()));
                return Ok(());
            }
        };

        debug!("--> {} frame ({} bytes)", message.kind(), text.len());
        if let Err(e) = transport.send_text(&text).await {
            self.report_send_failure(format!("failed to send {} frame: {e}", message.kind()));
        }
        Ok(())
    }

    fn report_send_failure(&self, reason: String) {
        error!("{reason}");
        let Some(tx) = &self.events_tx else {
            return;
        };
        if tx.try_send(ChannelEvent::SendFailed(reason)).is_err() {
            warn!("Channel event stream full or closed, send failure not reported");
        }
    }

    /// Closes the relay connection. Always succeeds.
    pub async fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.events_tx = None;
        if let Some(transport) = self.transport.take() {
            transport.disconnect().await;
            info!("Relay channel closed");
        }
    }

    /// Forgets a transport the relay already dropped, without a disconnect round trip.
    pub(crate) fn mark_closed(&mut self) {
        self.reader = None;
        self.events_tx = None;
        self.transport = None;
    }
}

async fn receive_loop(
    mut transport_events: mpsc::Receiver<TransportEvent>,
    events_tx: mpsc::Sender<ChannelEvent>,
) {
    while let Some(event) = transport_events.recv().await {
        match event {
            TransportEvent::Connected => trace!("Relay transport connected"),
            TransportEvent::TextReceived(text) => {
                trace!("<-- {text}");
                let message = match SignalingMessage::decode(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Dropping malformed signaling frame: {e}");
                        continue;
                    }
                };
                debug!("<-- {} frame ({} bytes)", message.kind(), text.len());
                if events_tx.send(ChannelEvent::Message(message)).await.is_err() {
                    return;
                }
            }
            TransportEvent::Disconnected => break,
        }
    }

    info!("Relay connection lost");
    let _ = events_tx.send(ChannelEvent::Closed).await;
}
