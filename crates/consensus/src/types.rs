//! Core types for rounds, updates and blocks

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::error::ConsensusError;

/// Index of a node in the network (0-based)
pub type NodeId = u32;

/// Round number
pub type Iteration = u64;

/// BLAKE3 hash of a block
pub type BlockHash = [u8; 32];

/// Hash used as `prev_hash` by the block of iteration 0
pub const GENESIS_HASH: BlockHash = [0u8; 32];

/// A single node's contribution for one round, sent to that round's verifier
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Update {
    /// Round this update belongs to
    pub iteration: Iteration,
    /// Opaque payload produced by the learner
    pub payload: Vec<u8>,
    /// Node that computed the update
    pub sender_id: NodeId,
}

impl Update {
    pub fn new(iteration: Iteration, payload: Vec<u8>, sender_id: NodeId) -> Self {
        Self {
            iteration,
            payload,
            sender_id,
        }
    }
}

/// The aggregate record of one round, appended by every node
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Block {
    /// Round this block closes
    pub iteration: Iteration,
    /// Aggregated payload of the round's updates
    pub payload: Vec<u8>,
    /// Verifier that produced the block
    pub producer_id: NodeId,
    /// Hash of the previous block (`GENESIS_HASH` for iteration 0)
    pub prev_hash: BlockHash,
    /// Hash of this block
    pub hash: BlockHash,
}

impl Block {
    /// Create a sealed block
    pub fn new(
        iteration: Iteration,
        payload: Vec<u8>,
        producer_id: NodeId,
        prev_hash: BlockHash,
    ) -> Self {
        let mut block = Self {
            iteration,
            payload,
            producer_id,
            prev_hash,
            hash: [0u8; 32],
        };
        block.hash = block.compute_hash();
        block
    }

    /// Hash over everything but the `hash` field
    pub fn compute_hash(&self) -> BlockHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.iteration.to_le_bytes());
        hasher.update(&self.producer_id.to_le_bytes());
        hasher.update(&self.prev_hash);
        hasher.update(&self.payload);
        *hasher.finalize().as_bytes()
    }

    /// Whether the stored hash matches the block contents
    pub fn is_sealed(&self) -> bool {
        self.compute_hash() == self.hash
    }

    /// Abbreviated base58 rendering of the hash, for logs
    pub fn short_hash(&self) -> String {
        short_hash(&self.hash)
    }
}

/// First 8 base58 characters of a hash
pub fn short_hash(hash: &BlockHash) -> String {
    bs58::encode(hash).into_string().chars().take(8).collect()
}

/// Node role in a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    /// Collects the round's updates and produces its block
    Verifier,
    /// Sends one update to the verifier and waits for the block
    NonVerifier,
}

/// Lifecycle phase of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    /// Started, no round entered yet
    AwaitingRole,
    /// Working through a round in the given role
    Active(NodeRole),
    /// Convergence reached, the node is about to emit its chain
    Converged,
}

/// Configuration for a consensus node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// This node's index
    pub node_id: NodeId,
    /// Number of nodes in the network
    pub total_nodes: u32,
}

impl ConsensusConfig {
    pub fn new(node_id: NodeId, total_nodes: u32) -> Self {
        Self {
            node_id,
            total_nodes,
        }
    }

    /// Reject configurations the protocol cannot run with
    pub fn validate(&self) -> Result<(), ConsensusError> {
        if self.total_nodes == 0 {
            return Err(ConsensusError::InvalidConfig(
                "total node count must be positive".to_string(),
            ));
        }
        if self.node_id >= self.total_nodes {
            return Err(ConsensusError::InvalidConfig(format!(
                "node index {} out of range for {} nodes",
                self.node_id, self.total_nodes
            )));
        }
        Ok(())
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            total_nodes: 1,
        }
    }
}
