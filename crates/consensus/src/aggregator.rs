//! Verifier-side collection of per-round updates
//!
//! Updates are buffered per round and per sender. The store and the quorum
//! check share one critical section, so a round's quorum fires exactly once
//! no matter how many updates race in.

use crate::types::{Iteration, NodeId, Update};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// What happened to an update handed to the aggregator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Stored, quorum not reached yet
    Buffered { count: usize },
    /// Stored and completed the quorum; carries the round's updates in sender order
    QuorumReached(Vec<Update>),
    /// Sender already contributed to this round, first update kept
    Duplicate,
    /// Quorum for this round already fired
    AfterQuorum,
}

#[derive(Debug, Default)]
struct RoundBuffer {
    updates: BTreeMap<NodeId, Update>,
    sealed: bool,
}

pub struct UpdateAggregator {
    quorum: usize,
    pending: Mutex<BTreeMap<Iteration, RoundBuffer>>,
}

impl UpdateAggregator {
    pub fn new(quorum: usize) -> Self {
        Self {
            quorum,
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Buffer an update and report whether it completed its round's quorum
    pub fn insert(&self, update: Update) -> Admission {
        let mut pending = self.pending.lock();
        let buffer = pending.entry(update.iteration).or_default();

        if buffer.sealed {
            return Admission::AfterQuorum;
        }
        if buffer.updates.contains_key(&update.sender_id) {
            return Admission::Duplicate;
        }

        buffer.updates.insert(update.sender_id, update);
        let count = buffer.updates.len();
        if count >= self.quorum {
            buffer.sealed = true;
            Admission::QuorumReached(buffer.updates.values().cloned().collect())
        } else {
            Admission::Buffered { count }
        }
    }

    /// Seal a round without a new update, if its quorum is already met.
    ///
    /// Only useful when the quorum is 0 (single-node network).
    pub fn try_seal(&self, iteration: Iteration) -> Option<Vec<Update>> {
        let mut pending = self.pending.lock();
        let buffer = pending.entry(iteration).or_default();
        if buffer.sealed || buffer.updates.len() < self.quorum {
            return None;
        }
        buffer.sealed = true;
        Some(buffer.updates.values().cloned().collect())
    }

    /// Number of updates buffered for `iteration`
    pub fn pending_count(&self, iteration: Iteration) -> usize {
        self.pending
            .lock()
            .get(&iteration)
            .map(|buffer| buffer.updates.len())
            .unwrap_or(0)
    }

    /// Discard every buffer up to and including `finished`.
    ///
    /// Returns how many updates were dropped.
    pub fn flush(&self, finished: Iteration) -> usize {
        let mut pending = self.pending.lock();
        let kept = pending.split_off(&(finished + 1));
        let dropped = pending.values().map(|buffer| buffer.updates.len()).sum();
        *pending = kept;
        dropped
    }
}
