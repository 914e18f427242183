//! Append-only ledger and the block lifecycle around it
//!
//! `Chain` enforces the ledger invariants (gap-free, duplicate-free, hash
//! linked). `ChainManager` owns a node's chain and builds, broadcasts and
//! appends blocks.

use crate::error::{ChainError, ConsensusError, TransportError};
use crate::learner::Learner;
use crate::selector::VerifierSelector;
use crate::transport::PeerTransport;
use crate::types::{short_hash, Block, BlockHash, Iteration, NodeId, Update, GENESIS_HASH};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Result of a successful append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// Identical block already present at that iteration
    Duplicate,
}

/// A node's ordered sequence of blocks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chain {
    blocks: Vec<Block>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn head(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn get(&self, iteration: Iteration) -> Option<&Block> {
        self.blocks.get(usize::try_from(iteration).ok()?)
    }

    /// Hash the next block must link to
    pub fn head_hash(&self) -> BlockHash {
        self.head().map(|block| block.hash).unwrap_or(GENESIS_HASH)
    }

    /// Iteration the next block must carry
    pub fn next_iteration(&self) -> Iteration {
        self.blocks.len() as Iteration
    }

    /// Append `block`, enforcing the chain invariants
    pub fn append(&mut self, block: Block) -> Result<AppendOutcome, ChainError> {
        if !block.is_sealed() {
            return Err(ChainError::BadHash {
                iteration: block.iteration,
            });
        }

        let expected = self.next_iteration();
        if block.iteration < expected {
            let existing = &self.blocks[block.iteration as usize];
            if existing.hash == block.hash {
                return Ok(AppendOutcome::Duplicate);
            }
            return Err(ChainError::Conflict {
                iteration: block.iteration,
                existing: existing.short_hash(),
                received: block.short_hash(),
            });
        }
        if block.iteration > expected {
            return Err(ChainError::Gap {
                expected,
                received: block.iteration,
            });
        }
        if block.prev_hash != self.head_hash() {
            return Err(ChainError::BrokenLink {
                iteration: block.iteration,
            });
        }

        self.blocks.push(block);
        Ok(AppendOutcome::Appended)
    }

    /// Serializable view of the chain, payloads rendered by `describe`
    pub fn records(&self, describe: impl Fn(&[u8]) -> String) -> Vec<BlockRecord> {
        self.blocks
            .iter()
            .map(|block| BlockRecord {
                iteration: block.iteration,
                producer: block.producer_id,
                hash: bs58::encode(block.hash).into_string(),
                prev_hash: bs58::encode(block.prev_hash).into_string(),
                payload: describe(&block.payload),
            })
            .collect()
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in &self.blocks {
            writeln!(
                f,
                "#{:<4} producer {:<3} hash {} prev {} ({} bytes)",
                block.iteration,
                block.producer_id,
                block.short_hash(),
                short_hash(&block.prev_hash),
                block.payload.len()
            )?;
        }
        Ok(())
    }
}

/// One block as emitted for external inspection
#[derive(Debug, Clone, Serialize)]
pub struct BlockRecord {
    pub iteration: Iteration,
    pub producer: NodeId,
    pub hash: String,
    pub prev_hash: String,
    pub payload: String,
}

/// Owns a node's chain and drives block construction and delivery
pub struct ChainManager {
    node_id: NodeId,
    selector: VerifierSelector,
    chain: RwLock<Chain>,
    learner: Arc<dyn Learner>,
    transport: Arc<dyn PeerTransport>,
}

impl ChainManager {
    pub fn new(
        node_id: NodeId,
        selector: VerifierSelector,
        learner: Arc<dyn Learner>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            node_id,
            selector,
            chain: RwLock::new(Chain::new()),
            learner,
            transport,
        }
    }

    /// Copy of the current chain
    pub fn snapshot(&self) -> Chain {
        self.chain.read().clone()
    }

    pub fn len(&self) -> usize {
        self.chain.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.read().is_empty()
    }

    pub fn block_at(&self, iteration: Iteration) -> Option<Block> {
        self.chain.read().get(iteration).cloned()
    }

    /// This node's update for `iteration`
    pub fn compute_update(&self, iteration: Iteration) -> Result<Update, ConsensusError> {
        let chain = self.chain.read();
        let payload = self
            .learner
            .compute_update(iteration, &chain)
            .map_err(ConsensusError::Learner)?;
        Ok(Update::new(iteration, payload, self.node_id))
    }

    /// Fold the quorum updates into the block for `iteration`
    pub fn create_block(
        &self,
        iteration: Iteration,
        updates: &[Update],
    ) -> Result<Block, ConsensusError> {
        let chain = self.chain.read();
        let payload = self
            .learner
            .aggregate(&chain, updates)
            .map_err(ConsensusError::Learner)?;
        Ok(Block::new(iteration, payload, self.node_id, chain.head_hash()))
    }

    pub fn append_block(&self, block: Block) -> Result<AppendOutcome, ChainError> {
        self.chain.write().append(block)
    }

    /// Append locally, then deliver to every other node.
    ///
    /// Returns only once every peer acknowledged. There is no partial
    /// success: one peer that never answers stalls the caller.
    pub async fn broadcast_block(&self, block: Block) -> Result<(), ConsensusError> {
        tracing::info!(
            "Sending block. Iteration: {} ({})",
            block.iteration,
            block.short_hash()
        );

        if self.append_block(block.clone())? == AppendOutcome::Duplicate {
            tracing::warn!("Own block {} was already on the chain", block.iteration);
        }

        let peers = self.selector.peers_of(self.node_id);
        let expected = peers.len();
        let block = Arc::new(block);

        let mut calls = JoinSet::new();
        for peer in peers {
            let transport = self.transport.clone();
            let block = block.clone();
            calls.spawn(async move { transport.register_block(peer, &block).await.map(|_| peer) });
        }

        let mut acknowledged = 0;
        while let Some(joined) = calls.join_next().await {
            let delivered = joined.map_err(|e| TransportError::Call {
                addr: "broadcast".to_string(),
                reason: e.to_string(),
            })?;
            let peer = delivered?;
            acknowledged += 1;
            tracing::debug!(
                "Block {} acknowledged by node {} ({}/{})",
                block.iteration,
                peer,
                acknowledged,
                expected
            );
        }

        Ok(())
    }

    /// Ask the learner whether the chain has converged
    pub fn check_convergence(&self) -> Result<bool, ConsensusError> {
        let chain = self.chain.read();
        self.learner
            .evaluate_convergence(&chain)
            .map_err(ConsensusError::Learner)
    }

    pub fn describe_payload(&self, payload: &[u8]) -> String {
        self.learner.describe_payload(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_of(len: u64) -> Chain {
        let mut chain = Chain::new();
        for iteration in 0..len {
            let block = Block::new(iteration, vec![iteration as u8], 0, chain.head_hash());
            chain.append(block).unwrap();
        }
        chain
    }

    #[test]
    fn test_sequential_append() {
        let chain = chain_of(3);
        assert_eq!(chain.len(), 3);
        let iterations: Vec<_> = chain.blocks().iter().map(|b| b.iteration).collect();
        assert_eq!(iterations, vec![0, 1, 2]);
        assert_eq!(chain.blocks()[0].prev_hash, GENESIS_HASH);
        assert_eq!(chain.blocks()[2].prev_hash, chain.blocks()[1].hash);
    }

    #[test]
    fn test_gap_rejected() {
        let mut chain = chain_of(1);
        let block = Block::new(2, vec![], 0, chain.head_hash());
        assert_eq!(
            chain.append(block),
            Err(ChainError::Gap {
                expected: 1,
                received: 2
            })
        );
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_identical_redelivery_is_duplicate() {
        let mut chain = chain_of(2);
        let again = chain.blocks()[1].clone();
        assert_eq!(chain.append(again), Ok(AppendOutcome::Duplicate));
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_conflicting_block_rejected() {
        let mut chain = chain_of(2);
        let rival = Block::new(1, vec![42], 1, chain.blocks()[0].hash);
        assert!(matches!(
            chain.append(rival),
            Err(ChainError::Conflict { iteration: 1, .. })
        ));
    }

    #[test]
    fn test_broken_link_rejected() {
        let mut chain = chain_of(1);
        let block = Block::new(1, vec![], 0, GENESIS_HASH);
        assert_eq!(
            chain.append(block),
            Err(ChainError::BrokenLink { iteration: 1 })
        );
    }

    #[test]
    fn test_tampered_block_rejected() {
        let mut chain = Chain::new();
        let mut block = Block::new(0, vec![1], 0, GENESIS_HASH);
        block.payload = vec![2];
        assert_eq!(chain.append(block), Err(ChainError::BadHash { iteration: 0 }));
    }

    #[test]
    fn test_records_render_payloads() {
        let chain = chain_of(2);
        let records = chain.records(|payload| format!("{:?}", payload));
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].payload, "[1]");
        assert_eq!(records[1].prev_hash, records[0].hash);
        assert_eq!(chain.to_string().lines().count(), 2);

        let json = serde_json::to_value(&records).unwrap();
        assert_eq!(json[0]["iteration"], 0);
        assert_eq!(json[0]["prev_hash"], bs58::encode(GENESIS_HASH).into_string());
    }
}
