//! Round controller - drives one node through the protocol
//!
//! Every round:
//! - non-verifiers compute an update and deliver it to the verifier
//! - the verifier buffers updates until quorum, builds the block and
//!   broadcasts it, waiting for every peer to acknowledge
//! - every node appends the block, evaluates convergence and advances
//!
//! Message handlers run as background tasks and report failures on a typed
//! event channel. `run` is the single place that decides termination.

use crate::aggregator::{Admission, UpdateAggregator};
use crate::chain::{AppendOutcome, Chain, ChainManager};
use crate::error::{ConsensusError, MessageKind, TransportError};
use crate::learner::Learner;
use crate::selector::VerifierSelector;
use crate::state::NodeState;
use crate::transport::{MessageHandler, PeerTransport};
use crate::types::{Block, ConsensusConfig, Iteration, NodeId, NodeRole, Update};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Reported by background tasks to the control loop
#[derive(Debug)]
pub enum NodeEvent {
    /// Convergence reached, the chain is final
    Converged,
    /// A handler hit an unrecoverable error
    Fatal(ConsensusError),
}

/// Counters about a node's traffic
#[derive(Debug, Default)]
struct NodeStats {
    updates_sent: AtomicU64,
    updates_received: AtomicU64,
    blocks_produced: AtomicU64,
    blocks_appended: AtomicU64,
    duplicates_ignored: AtomicU64,
}

/// Point-in-time copy of a node's counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub current_iteration: Option<Iteration>,
    pub updates_sent: u64,
    pub updates_received: u64,
    pub blocks_produced: u64,
    pub blocks_appended: u64,
    pub duplicates_ignored: u64,
}

pub struct RoundNode {
    state: NodeState,
    aggregator: UpdateAggregator,
    chain: ChainManager,
    transport: Arc<dyn PeerTransport>,
    events_tx: mpsc::UnboundedSender<NodeEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<NodeEvent>>>,
    stats: NodeStats,
}

impl RoundNode {
    /// Create a node. Nothing happens until `run` is called.
    pub fn new(
        config: ConsensusConfig,
        learner: Arc<dyn Learner>,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<Arc<Self>, ConsensusError> {
        config.validate()?;

        let selector = VerifierSelector::new(config.total_nodes);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Arc::new(Self {
            state: NodeState::new(config.node_id, selector),
            aggregator: UpdateAggregator::new(selector.quorum()),
            chain: ChainManager::new(config.node_id, selector, learner, transport.clone()),
            transport,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            stats: NodeStats::default(),
        }))
    }

    pub fn id(&self) -> NodeId {
        self.state.id()
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    /// Copy of the node's chain
    pub fn chain(&self) -> Chain {
        self.chain.snapshot()
    }

    pub fn describe_payload(&self, payload: &[u8]) -> String {
        self.chain.describe_payload(payload)
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            current_iteration: self.state.current_iteration(),
            updates_sent: self.stats.updates_sent.load(Ordering::Relaxed),
            updates_received: self.stats.updates_received.load(Ordering::Relaxed),
            blocks_produced: self.stats.blocks_produced.load(Ordering::Relaxed),
            blocks_appended: self.stats.blocks_appended.load(Ordering::Relaxed),
            duplicates_ignored: self.stats.duplicates_ignored.load(Ordering::Relaxed),
        }
    }

    /// Run the node until it converges or fails.
    ///
    /// The inbound side must already be wired to this node (as its
    /// `MessageHandler`). Returns the final chain on convergence.
    pub async fn run(self: Arc<Self>) -> Result<Chain, ConsensusError> {
        let mut events = self
            .events_rx
            .lock()
            .take()
            .ok_or(ConsensusError::AlreadyRunning)?;

        tracing::info!(
            "Node {} starting ({} nodes, quorum {})",
            self.id(),
            self.state.selector().total_nodes(),
            self.aggregator.quorum()
        );

        self.advance_round();
        let sender = tokio::spawn(self.clone().sender_loop());

        let outcome = loop {
            match events.recv().await {
                Some(NodeEvent::Converged) => break Ok(self.chain.snapshot()),
                Some(NodeEvent::Fatal(e)) => break Err(e),
                None => break Err(ConsensusError::Shutdown),
            }
        };

        sender.abort();
        outcome
    }

    /// Round transition: terminate on convergence, otherwise flush the
    /// finished round's buffer and enter the next round.
    fn advance_round(&self) {
        if self.state.is_converged() {
            tracing::info!(
                "Converged after {} blocks, stopping",
                self.chain.len()
            );
            let _ = self.events_tx.send(NodeEvent::Converged);
            return;
        }

        let entry = self.state.enter_next_round();

        if let Some((finished, NodeRole::Verifier)) = entry.previous {
            let dropped = self.aggregator.flush(finished);
            if dropped > 0 {
                tracing::debug!("Flushed {} leftover updates of iteration {}", dropped, finished);
            }
        }

        match entry.role {
            NodeRole::Verifier => {
                tracing::info!("I am verifier. Iteration: {}", entry.iteration)
            }
            NodeRole::NonVerifier => {
                tracing::info!("I am not verifier. Iteration: {}", entry.iteration)
            }
        }
    }

    fn fail(&self, error: ConsensusError) {
        tracing::debug!("Node {} reporting fatal error: {}", self.id(), error);
        let _ = self.events_tx.send(NodeEvent::Fatal(error));
    }

    /// Wakes on every round change and sends this node's update when one is owed
    async fn sender_loop(self: Arc<Self>) {
        let mut rounds = self.state.subscribe();
        loop {
            let _ = rounds.borrow_and_update();

            if let Some(iteration) = self.state.claim_update_duty() {
                tokio::spawn(self.clone().send_update(iteration));
            } else if self.state.is_verifier() && self.aggregator.quorum() == 0 {
                // single node network: nobody to wait for
                if let Some(iteration) = self.state.current_iteration() {
                    if let Some(updates) = self.aggregator.try_seal(iteration) {
                        tokio::spawn(self.clone().complete_round(iteration, updates));
                    }
                }
            }

            if rounds.changed().await.is_err() {
                return;
            }
        }
    }

    async fn send_update(self: Arc<Self>, iteration: Iteration) {
        if let Err(e) = self.deliver_update(iteration).await {
            self.fail(e);
        }
    }

    async fn deliver_update(&self, iteration: Iteration) -> Result<(), ConsensusError> {
        tracing::debug!("Computing update for iteration {}", iteration);
        let update = Arc::new(self.chain.compute_update(iteration)?);

        let mut calls = JoinSet::new();
        for verifier in self.state.selector().verifiers(iteration) {
            let transport = self.transport.clone();
            let update = update.clone();
            calls.spawn(async move {
                tracing::debug!(
                    "Sending update to verifier {}. Iteration: {}",
                    verifier,
                    update.iteration
                );
                transport.verify_update(verifier, &update).await
            });
        }

        while let Some(joined) = calls.join_next().await {
            let delivered = joined.map_err(|e| TransportError::Call {
                addr: "update".to_string(),
                reason: e.to_string(),
            })?;
            delivered?;
            self.stats.updates_sent.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Verifier side: gate, validate and buffer an update.
    ///
    /// Returns the round's updates when this one completed the quorum.
    async fn process_update(
        &self,
        update: Update,
    ) -> Result<Option<(Iteration, Vec<Update>)>, ConsensusError> {
        tracing::debug!(
            "Got update message from node {}, iteration {}",
            update.sender_id,
            update.iteration
        );

        self.state
            .wait_for_round(MessageKind::Update, update.iteration)
            .await?;

        let selector = self.state.selector();
        if !selector.is_verifier(update.iteration, self.id()) {
            return Err(ConsensusError::NotVerifier {
                node: self.id(),
                iteration: update.iteration,
            });
        }
        if update.sender_id >= selector.total_nodes()
            || selector.is_verifier(update.iteration, update.sender_id)
        {
            return Err(ConsensusError::UnexpectedSender {
                sender: update.sender_id,
                iteration: update.iteration,
            });
        }

        self.stats.updates_received.fetch_add(1, Ordering::Relaxed);
        let (iteration, sender) = (update.iteration, update.sender_id);

        match self.aggregator.insert(update) {
            Admission::QuorumReached(updates) => {
                tracing::info!(
                    "Quorum of {} updates reached for iteration {}",
                    updates.len(),
                    iteration
                );
                Ok(Some((iteration, updates)))
            }
            Admission::Buffered { count } => {
                tracing::debug!(
                    "Buffered update {}/{} for iteration {}",
                    count,
                    self.aggregator.quorum(),
                    iteration
                );
                Ok(None)
            }
            Admission::Duplicate => {
                tracing::warn!(
                    "Ignoring duplicate update from node {} for iteration {}",
                    sender,
                    iteration
                );
                self.stats.duplicates_ignored.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Admission::AfterQuorum => {
                tracing::debug!(
                    "Update from node {} arrived after quorum for iteration {}",
                    sender,
                    iteration
                );
                Ok(None)
            }
        }
    }

    /// Verifier side: build, broadcast, then move on
    async fn complete_round(self: Arc<Self>, iteration: Iteration, updates: Vec<Update>) {
        if let Err(e) = self.produce_block(iteration, &updates).await {
            self.fail(e);
        }
    }

    async fn produce_block(
        &self,
        iteration: Iteration,
        updates: &[Update],
    ) -> Result<(), ConsensusError> {
        let block = self.chain.create_block(iteration, updates)?;
        self.stats.blocks_produced.fetch_add(1, Ordering::Relaxed);

        self.chain.broadcast_block(block).await?;
        self.stats.blocks_appended.fetch_add(1, Ordering::Relaxed);

        let converged = self.chain.check_convergence()?;
        self.state.set_converged(converged);
        self.advance_round();
        Ok(())
    }

    async fn process_block(&self, block: Block) -> Result<(), ConsensusError> {
        tracing::debug!(
            "Got block message, iteration {} from node {}",
            block.iteration,
            block.producer_id
        );

        match self
            .state
            .wait_for_round(MessageKind::Block, block.iteration)
            .await
        {
            Err(ConsensusError::StaleMessage { .. }) if self.is_redelivery(&block) => {
                tracing::debug!("Block {} re-delivered, already on chain", block.iteration);
                self.stats.duplicates_ignored.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            result => result?,
        }

        if !self
            .state
            .selector()
            .is_verifier(block.iteration, block.producer_id)
        {
            return Err(ConsensusError::UnexpectedProducer {
                producer: block.producer_id,
                iteration: block.iteration,
            });
        }

        let iteration = block.iteration;
        if self.chain.append_block(block)? == AppendOutcome::Duplicate {
            tracing::debug!("Block {} re-delivered before round advanced", iteration);
            self.stats.duplicates_ignored.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        self.stats.blocks_appended.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Appended block {}", iteration);

        self.state.mark_update_sent();
        let converged = self.chain.check_convergence()?;
        self.state.set_converged(converged);
        self.advance_round();
        Ok(())
    }

    fn is_redelivery(&self, block: &Block) -> bool {
        self.chain
            .block_at(block.iteration)
            .map_or(false, |existing| existing.hash == block.hash)
    }
}

impl MessageHandler for RoundNode {
    fn on_verify_update(self: Arc<Self>, update: Update) {
        tokio::spawn(async move {
            let admitted = self.process_update(update).await;
            match admitted {
                Ok(Some((iteration, updates))) => self.complete_round(iteration, updates).await,
                Ok(None) => {}
                Err(e) => self.fail(e),
            }
        });
    }

    fn on_register_block(self: Arc<Self>, block: Block) {
        tokio::spawn(async move {
            if let Err(e) = self.process_block(block).await {
                self.fail(e);
            }
        });
    }
}
