//! Three nodes over real sockets agree on the same two blocks

use peerchain_consensus::{BoundedRetry, ConsensusConfig, RoundNode};
use peerchain_learning::{decode_weights, LearnerConfig, LinearLearner};
use peerchain_transport::{PeerClient, PeerDirectory, PeerServer};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_nodes_over_websocket() {
    const TOTAL: u32 = 3;

    let mut servers = Vec::new();
    for _ in 0..TOTAL {
        servers.push(PeerServer::bind("127.0.0.1:0").await.unwrap());
    }
    let directory = PeerDirectory::from_addrs(
        servers
            .iter()
            .enumerate()
            .map(|(id, server)| (id as u32, server.local_addr().to_string())),
    );

    let learner_config = LearnerConfig {
        dataset_id: "integration".to_string(),
        max_iterations: 2,
        ..Default::default()
    };

    let mut nodes = Vec::new();
    let mut listeners = Vec::new();
    for (id, server) in servers.into_iter().enumerate() {
        let id = id as u32;
        let client = PeerClient::new(
            directory.clone(),
            Arc::new(BoundedRetry::new(Duration::from_secs(2), 5, Duration::ZERO)),
        );
        let node = RoundNode::new(
            ConsensusConfig::new(id, TOTAL),
            Arc::new(LinearLearner::new(id, learner_config.clone()).unwrap()),
            Arc::new(client),
        )
        .unwrap();
        listeners.push(server.spawn(node.clone()));
        nodes.push(node);
    }

    let handles: Vec<_> = nodes.iter().cloned().map(|n| tokio::spawn(n.run())).collect();
    let mut chains = Vec::new();
    for handle in handles {
        let chain = tokio::time::timeout(Duration::from_secs(20), handle)
            .await
            .expect("node finished in time")
            .expect("node task panicked")
            .expect("node ran without fatal errors");
        chains.push(chain);
    }

    for chain in &chains {
        assert_eq!(chain, &chains[0]);
    }
    let blocks = chains[0].blocks();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].producer_id, 0);
    assert_eq!(blocks[1].producer_id, 1);
    assert_eq!(blocks[1].prev_hash, blocks[0].hash);
    assert_eq!(decode_weights(&blocks[1].payload).unwrap().len(), 4);

    for listener in listeners {
        listener.abort();
    }
}
