//! Federated linear regression

use crate::dataset::Dataset;
use peerchain_consensus::{Chain, Iteration, Learner, NodeId, Update};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LearnerError {
    #[error("payload is not a weight vector: {0}")]
    Decode(String),

    #[error("weights cannot be encoded: {0}")]
    Encode(String),

    #[error("expected {expected} weights, got {received}")]
    Dimensions { expected: usize, received: usize },

    #[error("invalid learner configuration: {0}")]
    InvalidConfig(String),
}

/// Learner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnerConfig {
    /// Seeds every shard of the run
    pub dataset_id: String,
    /// Model size
    pub dimensions: usize,
    /// Samples in each node's shard
    pub samples_per_node: usize,
    pub learning_rate: f64,
    /// Converged once a block moves the model less than this (L2)
    pub tolerance: f64,
    /// Converged once the chain holds this many blocks
    pub max_iterations: usize,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            dataset_id: "default".to_string(),
            dimensions: 4,
            samples_per_node: 64,
            learning_rate: 0.2,
            tolerance: 1e-4,
            max_iterations: 100,
        }
    }
}

impl LearnerConfig {
    pub fn validate(&self) -> Result<(), LearnerError> {
        if self.dataset_id.is_empty() {
            return Err(LearnerError::InvalidConfig("dataset id is empty".into()));
        }
        if self.dimensions == 0 {
            return Err(LearnerError::InvalidConfig("dimensions must be > 0".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(LearnerError::InvalidConfig(format!(
                "learning rate {} must be a positive number",
                self.learning_rate
            )));
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(LearnerError::InvalidConfig(format!(
                "tolerance {} must be a non-negative number",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(LearnerError::InvalidConfig(
                "max iterations must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Borsh refuses NaN, so a diverged model surfaces here
pub fn encode_weights(weights: &[f64]) -> Result<Vec<u8>, LearnerError> {
    borsh::to_vec(weights).map_err(|e| LearnerError::Encode(e.to_string()))
}

pub fn decode_weights(payload: &[u8]) -> Result<Vec<f64>, LearnerError> {
    borsh::from_slice(payload).map_err(|e| LearnerError::Decode(e.to_string()))
}

/// Update payload: a gradient step. Block payload: the new weights.
pub struct LinearLearner {
    node_id: NodeId,
    config: LearnerConfig,
    shard: Dataset,
}

impl LinearLearner {
    pub fn new(node_id: NodeId, config: LearnerConfig) -> Result<Self, LearnerError> {
        config.validate()?;
        let shard = Dataset::synthetic(
            &config.dataset_id,
            node_id,
            config.dimensions,
            config.samples_per_node,
        );
        tracing::info!(
            "Node {} loaded shard of {} samples from dataset {}",
            node_id,
            shard.len(),
            config.dataset_id
        );
        Ok(Self {
            node_id,
            config,
            shard,
        })
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    pub fn shard(&self) -> &Dataset {
        &self.shard
    }

    /// Weights in the chain head, zeros before the first block
    pub fn weights(&self, chain: &Chain) -> Result<Vec<f64>, LearnerError> {
        match chain.head() {
            Some(block) => self.decode(&block.payload),
            None => Ok(vec![0.0; self.config.dimensions]),
        }
    }

    fn decode(&self, payload: &[u8]) -> Result<Vec<f64>, LearnerError> {
        let weights = decode_weights(payload)?;
        if weights.len() != self.config.dimensions {
            return Err(LearnerError::Dimensions {
                expected: self.config.dimensions,
                received: weights.len(),
            });
        }
        Ok(weights)
    }

    fn local_step(&self, weights: &[f64]) -> Vec<f64> {
        self.shard
            .gradient(weights)
            .into_iter()
            .map(|g| -self.config.learning_rate * g)
            .collect()
    }

    /// L2 distance the last block moved the model
    fn last_step_norm(&self, chain: &Chain) -> Result<Option<f64>, LearnerError> {
        let blocks = chain.blocks();
        let Some(head) = blocks.last() else {
            return Ok(None);
        };
        let current = self.decode(&head.payload)?;
        let previous = match blocks.len() {
            1 => vec![0.0; self.config.dimensions],
            n => self.decode(&blocks[n - 2].payload)?,
        };
        let norm = current
            .iter()
            .zip(&previous)
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt();
        Ok(Some(norm))
    }
}

impl Learner for LinearLearner {
    fn compute_update(&self, iteration: Iteration, chain: &Chain) -> anyhow::Result<Vec<u8>> {
        let weights = self.weights(chain)?;
        let step = self.local_step(&weights);
        tracing::debug!(
            "Node {} step for iteration {}, local loss {:.6}",
            self.node_id,
            iteration,
            self.shard.loss(&weights)
        );
        Ok(encode_weights(&step)?)
    }

    /// New weights: head weights plus the mean of the received steps and
    /// the aggregating node's own step
    fn aggregate(&self, chain: &Chain, updates: &[Update]) -> anyhow::Result<Vec<u8>> {
        let weights = self.weights(chain)?;
        let mut total = self.local_step(&weights);
        for update in updates {
            let step = self.decode(&update.payload).map_err(|e| {
                anyhow::anyhow!("update from node {}: {}", update.sender_id, e)
            })?;
            for (t, s) in total.iter_mut().zip(step) {
                *t += s;
            }
        }

        let contributors = (updates.len() + 1) as f64;
        let next: Vec<f64> = weights
            .iter()
            .zip(&total)
            .map(|(w, t)| w + t / contributors)
            .collect();
        tracing::debug!(
            "Aggregated {} updates, local loss {:.6}",
            updates.len(),
            self.shard.loss(&next)
        );
        Ok(encode_weights(&next)?)
    }

    fn evaluate_convergence(&self, chain: &Chain) -> anyhow::Result<bool> {
        if chain.len() >= self.config.max_iterations {
            return Ok(true);
        }
        Ok(matches!(
            self.last_step_norm(chain)?,
            Some(norm) if norm < self.config.tolerance
        ))
    }

    fn describe_payload(&self, payload: &[u8]) -> String {
        match decode_weights(payload) {
            Ok(weights) => {
                let parts: Vec<String> = weights.iter().map(|w| format!("{:.4}", w)).collect();
                format!("[{}]", parts.join(", "))
            }
            Err(_) => format!("{} bytes", payload.len()),
        }
    }
}
