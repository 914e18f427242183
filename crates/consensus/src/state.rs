//! Per-node round state
//!
//! Role/flag state and the converged flag sit behind two separate locks.
//! Neither is ever held across an await. Round changes are published on a
//! `watch` channel so message handlers can wait for their round without
//! polling.

use crate::error::{ConsensusError, MessageKind};
use crate::selector::VerifierSelector;
use crate::types::{Iteration, NodeId, NodeRole, Phase};
use parking_lot::Mutex;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default)]
struct RoundState {
    /// `None` until the first round is entered
    iteration: Option<Iteration>,
    role: Option<NodeRole>,
    update_sent: bool,
}

/// Outcome of entering a new round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundEntry {
    pub iteration: Iteration,
    pub role: NodeRole,
    /// The round just left and the role held in it
    pub previous: Option<(Iteration, NodeRole)>,
}

pub struct NodeState {
    id: NodeId,
    selector: VerifierSelector,
    round: Mutex<RoundState>,
    converged: Mutex<bool>,
    iteration_tx: watch::Sender<Option<Iteration>>,
}

impl NodeState {
    pub fn new(id: NodeId, selector: VerifierSelector) -> Self {
        let (iteration_tx, _) = watch::channel(None);
        Self {
            id,
            selector,
            round: Mutex::new(RoundState::default()),
            converged: Mutex::new(false),
            iteration_tx,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn selector(&self) -> &VerifierSelector {
        &self.selector
    }

    pub fn current_iteration(&self) -> Option<Iteration> {
        self.round.lock().iteration
    }

    pub fn role(&self) -> Option<NodeRole> {
        self.round.lock().role
    }

    pub fn is_verifier(&self) -> bool {
        self.role() == Some(NodeRole::Verifier)
    }

    pub fn update_sent(&self) -> bool {
        self.round.lock().update_sent
    }

    pub fn phase(&self) -> Phase {
        if self.is_converged() {
            return Phase::Converged;
        }
        match self.role() {
            Some(role) => Phase::Active(role),
            None => Phase::AwaitingRole,
        }
    }

    pub fn is_converged(&self) -> bool {
        *self.converged.lock()
    }

    pub fn set_converged(&self, converged: bool) {
        *self.converged.lock() = converged;
    }

    /// Mark this round's update as no longer owed
    pub fn mark_update_sent(&self) {
        self.round.lock().update_sent = true;
    }

    /// Take the duty to send this round's update.
    ///
    /// Returns the round once, for a non-verifier that has not sent yet.
    pub fn claim_update_duty(&self) -> Option<Iteration> {
        let mut round = self.round.lock();
        match (round.iteration, round.role, round.update_sent) {
            (Some(iteration), Some(NodeRole::NonVerifier), false) => {
                round.update_sent = true;
                Some(iteration)
            }
            _ => None,
        }
    }

    /// Move to the next round (the first one on startup) and recompute the role
    pub fn enter_next_round(&self) -> RoundEntry {
        let entry = {
            let mut round = self.round.lock();
            let previous = round.iteration.zip(round.role);
            let iteration = round.iteration.map_or(0, |current| current + 1);
            let role = if self.selector.is_verifier(iteration, self.id) {
                NodeRole::Verifier
            } else {
                NodeRole::NonVerifier
            };

            round.iteration = Some(iteration);
            round.role = Some(role);
            // a verifier never sends an update
            round.update_sent = role == NodeRole::Verifier;

            RoundEntry {
                iteration,
                role,
                previous,
            }
        };

        self.iteration_tx.send_replace(Some(entry.iteration));
        entry
    }

    /// Observe round changes
    pub fn subscribe(&self) -> watch::Receiver<Option<Iteration>> {
        self.iteration_tx.subscribe()
    }

    /// Gate a message for round `target`.
    ///
    /// Fails with `StaleMessage` if the node is already past `target`, waits
    /// while it is behind, and returns once it is exactly at `target`.
    pub async fn wait_for_round(
        &self,
        kind: MessageKind,
        target: Iteration,
    ) -> Result<(), ConsensusError> {
        let mut rounds = self.iteration_tx.subscribe();
        let mut announced = false;
        loop {
            let current = *rounds.borrow_and_update();
            match current {
                Some(current) if target < current => {
                    return Err(ConsensusError::StaleMessage {
                        kind,
                        received: target,
                        current,
                    })
                }
                Some(current) if target == current => return Ok(()),
                _ => {
                    if !announced {
                        tracing::debug!(
                            "Blocking. Got {} for {}, I am at {:?}",
                            kind,
                            target,
                            current
                        );
                        announced = true;
                    }
                }
            }
            rounds.changed().await.map_err(|_| ConsensusError::Shutdown)?;
        }
    }
}
