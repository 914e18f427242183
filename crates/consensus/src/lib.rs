//! PeerChain Consensus - round-based verifier protocol
//!
//! Architecture:
//! - Every round elects one verifier (round-robin placeholder)
//! - Non-verifiers send their update to the verifier
//! - The verifier aggregates a quorum of updates into a block and
//!   broadcasts it, waiting until every peer acknowledged
//! - Every node appends the block, checks convergence and advances
//!
//! A message for a past round is fatal, a message for a future round waits
//! until the receiver catches up. Block delivery is the only round barrier.

pub mod aggregator;
pub mod chain;
pub mod controller;
pub mod error;
pub mod learner;
pub mod retry;
pub mod selector;
pub mod state;
pub mod transport;
pub mod types;

#[cfg(test)]
mod tests;

pub use aggregator::{Admission, UpdateAggregator};
pub use chain::{AppendOutcome, BlockRecord, Chain, ChainManager};
pub use controller::{NodeEvent, RoundNode, StatsSnapshot};
pub use error::{ChainError, ConsensusError, MessageKind, TransportError};
pub use learner::Learner;
pub use retry::{call_with_retry, BoundedRetry, RetryPolicy, UnboundedRetry, DEFAULT_CALL_TIMEOUT};
pub use selector::{VerifierSelector, VERIFIER_SLOTS};
pub use state::{NodeState, RoundEntry};
pub use transport::{MessageHandler, PeerTransport};
pub use types::*;
