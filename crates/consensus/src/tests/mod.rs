//! Multi-node scenarios over an in-process network


use crate::chain::Chain;
use crate::controller::RoundNode;
use crate::error::{MessageKind, TransportError};
use crate::learner::Learner;
use crate::retry::{call_with_retry, BoundedRetry};
use crate::transport::{MessageHandler, PeerTransport};
use crate::types::{Block, ConsensusConfig, Iteration, NodeId, Update};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Payloads are readable strings: an update is `"<node>@<iteration>"`, a
/// block joins its updates with commas.
pub struct CountingLearner {
    node_id: NodeId,
    converge_after: usize,
}

impl CountingLearner {
    pub fn new(node_id: NodeId, converge_after: usize) -> Self {
        Self {
            node_id,
            converge_after,
        }
    }
}

impl Learner for CountingLearner {
    fn compute_update(&self, iteration: Iteration, _chain: &Chain) -> anyhow::Result<Vec<u8>> {
        Ok(format!("{}@{}", self.node_id, iteration).into_bytes())
    }

    fn aggregate(&self, _chain: &Chain, updates: &[Update]) -> anyhow::Result<Vec<u8>> {
        let parts: Vec<String> = updates
            .iter()
            .map(|u| String::from_utf8_lossy(&u.payload).into_owned())
            .collect();
        Ok(parts.join(",").into_bytes())
    }

    fn evaluate_convergence(&self, chain: &Chain) -> anyhow::Result<bool> {
        Ok(chain.len() >= self.converge_after)
    }
}

/// Routes calls straight to registered nodes' handlers.
///
/// Calls to unregistered nodes are acknowledged and dropped. Individual
/// attempts can be made to hang so the retry path is exercised.
pub struct LocalNetwork {
    nodes: RwLock<HashMap<NodeId, Arc<RoundNode>>>,
    policy: BoundedRetry,
    stalls: Mutex<HashMap<(NodeId, MessageKind), u32>>,
    block_attempts: Mutex<HashMap<NodeId, u32>>,
    acknowledged: Mutex<Vec<(NodeId, Iteration)>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: RwLock::new(HashMap::new()),
            policy: BoundedRetry::new(Duration::from_millis(50), 20, Duration::ZERO),
            stalls: Mutex::new(HashMap::new()),
            block_attempts: Mutex::new(HashMap::new()),
            acknowledged: Mutex::new(Vec::new()),
        })
    }

    pub fn register(&self, node: Arc<RoundNode>) {
        self.nodes.write().insert(node.id(), node);
    }

    /// Make the next `attempts` calls of `kind` to `peer` hang
    pub fn stall(&self, peer: NodeId, kind: MessageKind, attempts: u32) {
        self.stalls.lock().insert((peer, kind), attempts);
    }

    pub fn block_attempts(&self, peer: NodeId) -> u32 {
        self.block_attempts.lock().get(&peer).copied().unwrap_or(0)
    }

    /// Number of peers that acknowledged the block of `iteration`
    pub fn acknowledged_blocks(&self, iteration: Iteration) -> usize {
        self.acknowledged
            .lock()
            .iter()
            .filter(|(_, acked)| *acked == iteration)
            .count()
    }

    fn take_stall(&self, peer: NodeId, kind: MessageKind) -> bool {
        let mut stalls = self.stalls.lock();
        match stalls.get_mut(&(peer, kind)) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }

    fn node(&self, peer: NodeId) -> Option<Arc<RoundNode>> {
        self.nodes.read().get(&peer).cloned()
    }
}

#[async_trait]
impl PeerTransport for LocalNetwork {
    async fn verify_update(&self, peer: NodeId, update: &Update) -> Result<(), TransportError> {
        let addr = format!("local:{}", peer);
        call_with_retry(&self.policy, &addr, || {
            let stalled = self.take_stall(peer, MessageKind::Update);
            let target = self.node(peer);
            let update = update.clone();
            async move {
                if stalled {
                    std::future::pending::<()>().await;
                }
                if let Some(node) = target {
                    node.on_verify_update(update);
                }
                Ok(())
            }
        })
        .await
        .map(|_| ())
    }

    async fn register_block(&self, peer: NodeId, block: &Block) -> Result<(), TransportError> {
        let addr = format!("local:{}", peer);
        call_with_retry(&self.policy, &addr, || {
            *self.block_attempts.lock().entry(peer).or_default() += 1;
            let stalled = self.take_stall(peer, MessageKind::Block);
            let target = self.node(peer);
            let block = block.clone();
            async move {
                if stalled {
                    std::future::pending::<()>().await;
                }
                let iteration = block.iteration;
                if let Some(node) = target {
                    node.on_register_block(block);
                }
                self.acknowledged.lock().push((peer, iteration));
                Ok(())
            }
        })
        .await
        .map(|_| ())
    }
}

/// Build `total` nodes on one network; `converge_after(id)` sets each
/// node's convergence point in blocks.
pub fn build_network(
    total: u32,
    converge_after: impl Fn(NodeId) -> usize,
) -> (Arc<LocalNetwork>, Vec<Arc<RoundNode>>) {
    let network = LocalNetwork::new();
    let nodes: Vec<_> = (0..total)
        .map(|id| {
            let node = RoundNode::new(
                ConsensusConfig::new(id, total),
                Arc::new(CountingLearner::new(id, converge_after(id))),
                network.clone(),
            )
            .unwrap();
            network.register(node.clone());
            node
        })
        .collect();
    (network, nodes)
}

/// Build node `id` of a `total`-node network where no other node is reachable
pub fn lone_node(id: NodeId, total: u32, converge_after: usize) -> Arc<RoundNode> {
    let network = LocalNetwork::new();
    let node = RoundNode::new(
        ConsensusConfig::new(id, total),
        Arc::new(CountingLearner::new(id, converge_after)),
        network.clone(),
    )
    .unwrap();
    network.register(node.clone());
    node
}

/// Poll `condition` until it holds, panicking after two seconds
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
