//! Bookkeeping for one call attempt.

use crate::candidate_buffer::CandidateBuffer;
use crate::negotiator::SessionNegotiator;
use crate::types::{ConnectivityCandidate, SessionDescription};
use super::error::CallError;
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::fmt;
use tokio::task::JoinHandle;

/// Monotonic identifier tagging every event produced for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

pub struct CallAttempt {
    id: AttemptId,
    direction: CallDirection,
    negotiator: SessionNegotiator,
    candidates: CandidateBuffer,
    created_at: DateTime<Utc>,
    connected_at: Option<DateTime<Utc>>,
    event_pump: Option<JoinHandle<()>>,
}

impl CallAttempt {
    pub fn new(
        id: AttemptId,
        direction: CallDirection,
        negotiator: SessionNegotiator,
        event_pump: JoinHandle<()>,
    ) -> Self {
        info!("Call attempt {id} created ({direction:?})");
        Self {
            id,
            direction,
            negotiator,
            candidates: CandidateBuffer::new(),
            created_at: Utc::now(),
            connected_at: None,
            event_pump: Some(event_pump),
        }
    }

    pub fn id(&self) -> AttemptId {
        self.id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }

    pub fn negotiator(&self) -> &SessionNegotiator {
        &self.negotiator
    }

    pub fn negotiator_mut(&mut self) -> &mut SessionNegotiator {
        &mut self.negotiator
    }

    /// Routes a remote candidate through the buffer; delivered now only if
    /// the remote description is already applied.
    pub async fn offer_candidate(&mut self, candidate: ConnectivityCandidate) {
        if let Some(ready) = self.candidates.offer(candidate) {
            self.negotiator.add_remote_candidate(&ready).await;
        }
    }

    /// Applies the remote description, then releases buffered candidates in arrival order.
    pub async fn apply_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), CallError> {
        self.negotiator.set_remote_description(desc).await?;
        let pending = self.candidates.flush();
        if !pending.is_empty() {
            debug!("Releasing {} buffered candidates", pending.len());
        }
        for candidate in pending {
            self.negotiator.add_remote_candidate(&candidate).await;
        }
        Ok(())
    }

    pub fn mark_connected(&mut self) {
        if self.connected_at.is_none() {
            self.connected_at = Some(Utc::now());
        }
    }

    /// Releases the peer session and stops the event pump.
    pub async fn close(&mut self) {
        self.negotiator.close().await;
        if let Some(pump) = self.event_pump.take() {
            pump.abort();
        }
        let dropped = self.candidates.clear();
        if dropped > 0 {
            debug!("Discarded {dropped} unapplied candidates");
        }
        match self.connected_at {
            Some(connected_at) => {
                let duration = Utc::now() - connected_at;
                info!(
                    "Call attempt {} closed after {}s connected",
                    self.id,
                    duration.num_seconds()
                );
            }
            None => info!("Call attempt {} closed before connecting", self.id),
        }
    }
}

impl fmt::Debug for CallAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallAttempt")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("created_at", &self.created_at)
            .field("connected_at", &self.connected_at)
            .field("buffered_candidates", &self.candidates.len())
            .finish()
    }
}
