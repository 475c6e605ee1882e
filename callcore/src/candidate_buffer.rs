//! Ordering buffer for remote connectivity candidates.
//!
//! A candidate refers to a media line of the remote description, so feeding
//! one to the peer session before that description is applied is undefined.
//! The buffer holds candidates until [`CandidateBuffer::flush`] is called right
//! after the remote description has been set, then lets later candidates pass
//! straight through.

use std::collections::VecDeque;

use log::{trace, warn};

use crate::types::ConnectivityCandidate;

#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: VecDeque<ConnectivityCandidate>,
    released: bool,
    limit: Option<usize>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer that keeps at most `limit` queued candidates, dropping the
    /// oldest when full.
    pub fn bounded(limit: usize) -> Self {
        Self {
            limit: Some(limit.max(1)),
            ..Self::default()
        }
    }

    /// Accepts a candidate.
    ///
    /// Returns the candidate back when it may be delivered immediately (the
    /// buffer has already been flushed), otherwise queues it and returns `None`.
    pub fn offer(&mut self, candidate: ConnectivityCandidate) -> Option<ConnectivityCandidate> {
        if self.released {
            return Some(candidate);
        }
        if let Some(limit) = self.limit {
            while self.pending.len() >= limit {
                if let Some(dropped) = self.pending.pop_front() {
                    warn!(
                        "Candidate buffer full ({limit}), dropping oldest: {}",
                        dropped.candidate
                    );
                }
            }
        }
        self.pending.push_back(candidate);
        trace!("Buffered remote candidate ({} pending)", self.pending.len());
        None
    }

    /// Releases every queued candidate in arrival order and switches the
    /// buffer to pass-through mode.
    pub fn flush(&mut self) -> Vec<ConnectivityCandidate> {
        self.released = true;
        self.pending.drain(..).collect()
    }

    /// Removes queued candidates in arrival order without switching to pass-through.
    pub fn take_pending(&mut self) -> Vec<ConnectivityCandidate> {
        self.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops queued candidates without delivering them. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}
