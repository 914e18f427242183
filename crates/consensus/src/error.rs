//! Error taxonomy
//!
//! Timeouts never appear here: they are absorbed by the retry primitive.
//! Everything else is fatal to the node.

use crate::types::{Iteration, NodeId};
use std::fmt;
use thiserror::Error;

/// Kind of inbound protocol message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Update,
    Block,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Update => write!(f, "update"),
            MessageKind::Block => write!(f, "block"),
        }
    }
}

/// Non-timeout transport failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },

    #[error("call to {addr} failed: {reason}")]
    Call { addr: String, reason: String },

    #[error("{addr} rejected the call: {reason}")]
    Rejected { addr: String, reason: String },

    #[error("gave up on {addr} after {attempts} timed out attempts")]
    RetriesExhausted { addr: String, attempts: u32 },

    #[error("no address known for node {0}")]
    UnknownPeer(NodeId),
}

/// Violations of the chain invariants
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("expected block for iteration {expected}, got {received}")]
    Gap {
        expected: Iteration,
        received: Iteration,
    },

    #[error("block {iteration} does not link to the chain head")]
    BrokenLink { iteration: Iteration },

    #[error("block {iteration} hash does not match its contents")]
    BadHash { iteration: Iteration },

    #[error("conflicting block for iteration {iteration}: have {existing}, got {received}")]
    Conflict {
        iteration: Iteration,
        existing: String,
        received: String,
    },
}

/// Errors that halt a node
#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("stale {kind} for iteration {received}, node is at iteration {current}")]
    StaleMessage {
        kind: MessageKind,
        received: Iteration,
        current: Iteration,
    },

    #[error("node {node} is not the verifier for iteration {iteration}")]
    NotVerifier { node: NodeId, iteration: Iteration },

    #[error("unexpected update sender {sender} for iteration {iteration}")]
    UnexpectedSender { sender: NodeId, iteration: Iteration },

    #[error("block {iteration} produced by node {producer}, which is not its verifier")]
    UnexpectedProducer {
        producer: NodeId,
        iteration: Iteration,
    },

    #[error("chain violation: {0}")]
    Chain(#[from] ChainError),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("learner failure: {0}")]
    Learner(#[source] anyhow::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("node is already running")]
    AlreadyRunning,

    #[error("node shut down")]
    Shutdown,
}
