//! Node Configuration

use clap::ValueEnum;
use peerchain_consensus::ConsensusConfig;
use peerchain_learning::LearnerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the final chain is written to stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One line per block
    Text,
    /// A single JSON document
    Json,
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Number of nodes in the network
    pub total_nodes: u32,
    /// This node's index
    pub node_index: u32,
    /// Dataset identifier handed to the learner
    pub dataset: String,
    /// Host every node listens on
    pub host: String,
    /// Node i listens on base_port + i
    pub base_port: u16,
    /// Per-attempt RPC deadline
    pub rpc_timeout_secs: u64,
    /// Learner stops after this many blocks
    pub max_iterations: usize,
    /// Learner stops once a block moves the model less than this
    pub tolerance: f64,
    pub output: OutputFormat,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            total_nodes: 1,
            node_index: 0,
            dataset: String::new(),
            host: "127.0.0.1".to_string(),
            base_port: 8000,
            rpc_timeout_secs: 10,
            max_iterations: 100,
            tolerance: LearnerConfig::default().tolerance,
            output: OutputFormat::Text,
        }
    }
}

impl NodeConfig {
    pub fn consensus(&self) -> ConsensusConfig {
        ConsensusConfig::new(self.node_index, self.total_nodes)
    }

    pub fn learner(&self) -> LearnerConfig {
        LearnerConfig {
            dataset_id: self.dataset.clone(),
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            ..Default::default()
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Address this node listens on
    pub fn listen_addr(&self) -> String {
        format!(
            "{}:{}",
            self.host,
            u32::from(self.base_port) + self.node_index
        )
    }

    /// Check everything that can be checked before touching the network
    pub fn validate(&self) -> anyhow::Result<()> {
        self.consensus().validate()?;
        self.learner().validate()?;
        if self.rpc_timeout_secs == 0 {
            anyhow::bail!("rpc timeout must be at least one second");
        }
        let last_port = u32::from(self.base_port).saturating_add(self.total_nodes - 1);
        if last_port > u32::from(u16::MAX) {
            anyhow::bail!(
                "ports {}..={} do not fit below 65536",
                self.base_port,
                last_port
            );
        }
        Ok(())
    }
}
