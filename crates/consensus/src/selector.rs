//! Verifier election
//!
//! Round-robin placeholder: the verifier of round `i` is node `i mod n`.
//! It is deterministic and needs no communication. It is not an
//! unpredictable or verifiable random function; a VRF would plug in here.

use crate::types::{Iteration, NodeId};

/// Verifier slots per round
pub const VERIFIER_SLOTS: usize = 1;

/// Elects the verifier(s) of a round from the round number alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifierSelector {
    total_nodes: u32,
}

impl VerifierSelector {
    /// `total_nodes` must be positive (checked by `ConsensusConfig::validate`)
    pub fn new(total_nodes: u32) -> Self {
        debug_assert!(total_nodes > 0);
        Self {
            total_nodes: total_nodes.max(1),
        }
    }

    pub fn total_nodes(&self) -> u32 {
        self.total_nodes
    }

    /// The verifier of `iteration`
    pub fn verifier(&self, iteration: Iteration) -> NodeId {
        (iteration % self.total_nodes as u64) as NodeId
    }

    /// All verifier slots of `iteration`, always `VERIFIER_SLOTS` long
    pub fn verifiers(&self, iteration: Iteration) -> Vec<NodeId> {
        (0..VERIFIER_SLOTS as u64)
            .map(|slot| self.verifier(iteration + slot))
            .collect()
    }

    pub fn is_verifier(&self, iteration: Iteration, node: NodeId) -> bool {
        self.verifiers(iteration).contains(&node)
    }

    /// Number of distinct updates a verifier waits for
    pub fn quorum(&self) -> usize {
        (self.total_nodes as usize).saturating_sub(VERIFIER_SLOTS)
    }

    /// Every node except `node`
    pub fn peers_of(&self, node: NodeId) -> Vec<NodeId> {
        (0..self.total_nodes).filter(|id| *id != node).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin() {
        let selector = VerifierSelector::new(3);
        assert_eq!(selector.verifier(0), 0);
        assert_eq!(selector.verifier(1), 1);
        assert_eq!(selector.verifier(2), 2);
        assert_eq!(selector.verifier(3), 0);
        assert_eq!(selector.verifier(301), 1);
    }

    #[test]
    fn test_deterministic() {
        let selector = VerifierSelector::new(7);
        for iteration in 0..50 {
            let first = selector.verifiers(iteration);
            assert_eq!(first, selector.verifiers(iteration));
            assert_eq!(first, VerifierSelector::new(7).verifiers(iteration));
        }
    }

    #[test]
    fn test_exactly_one_verifier_per_round() {
        for total in 1..10u32 {
            let selector = VerifierSelector::new(total);
            for iteration in 0..40 {
                let elected = (0..total)
                    .filter(|id| selector.is_verifier(iteration, *id))
                    .count();
                assert_eq!(elected, VERIFIER_SLOTS);
                assert_eq!(selector.verifiers(iteration).len(), VERIFIER_SLOTS);
            }
        }
    }

    #[test]
    fn test_quorum_and_peers() {
        let selector = VerifierSelector::new(4);
        assert_eq!(selector.quorum(), 3);
        assert_eq!(selector.peers_of(2), vec![0, 1, 3]);
        assert_eq!(VerifierSelector::new(1).quorum(), 0);
        assert!(VerifierSelector::new(1).peers_of(0).is_empty());
    }
}
