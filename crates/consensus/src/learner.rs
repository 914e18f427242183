//! Update-computation collaborator
//!
//! The protocol never looks inside payloads. Whatever produces updates,
//! folds them into a block and decides when to stop lives behind `Learner`.

use crate::chain::Chain;
use crate::types::{Iteration, Update};

pub trait Learner: Send + Sync {
    /// This node's contribution for `iteration`, given the chain so far
    fn compute_update(&self, iteration: Iteration, chain: &Chain) -> anyhow::Result<Vec<u8>>;

    /// Fold a round's updates into the payload of its block
    fn aggregate(&self, chain: &Chain, updates: &[Update]) -> anyhow::Result<Vec<u8>>;

    /// Whether the chain has reached the stopping condition
    fn evaluate_convergence(&self, chain: &Chain) -> anyhow::Result<bool>;

    /// Human readable payload rendering for chain emission
    fn describe_payload(&self, payload: &[u8]) -> String {
        format!("{} bytes", payload.len())
    }
}
