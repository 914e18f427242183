//! Deterministic synthetic shards
//!
//! Every node of a run derives the same ground-truth weights from the
//! dataset id, and its own samples from the dataset id plus its node id.

use peerchain_consensus::NodeId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Noise added to each target
const NOISE: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct Dataset {
    features: Vec<Vec<f64>>,
    targets: Vec<f64>,
}

impl Dataset {
    /// Shard `node_id` of dataset `dataset_id`
    pub fn synthetic(dataset_id: &str, node_id: NodeId, dimensions: usize, samples: usize) -> Self {
        let truth = Self::ground_truth(dataset_id, dimensions);

        let mut hasher = blake3::Hasher::new();
        hasher.update(dataset_id.as_bytes());
        hasher.update(&node_id.to_le_bytes());
        let mut rng = StdRng::from_seed(*hasher.finalize().as_bytes());

        let mut features = Vec::with_capacity(samples);
        let mut targets = Vec::with_capacity(samples);
        for _ in 0..samples {
            let x: Vec<f64> = (0..dimensions).map(|_| rng.gen_range(-1.0..=1.0)).collect();
            let y = dot(&truth, &x) + rng.gen_range(-NOISE..=NOISE);
            features.push(x);
            targets.push(y);
        }

        Self { features, targets }
    }

    /// Weights every shard of `dataset_id` is generated from
    pub fn ground_truth(dataset_id: &str, dimensions: usize) -> Vec<f64> {
        let seed = blake3::hash(dataset_id.as_bytes());
        let mut rng = StdRng::from_seed(*seed.as_bytes());
        (0..dimensions).map(|_| rng.gen_range(-1.0..=1.0)).collect()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Gradient of the mean squared error at `weights`
    pub fn gradient(&self, weights: &[f64]) -> Vec<f64> {
        let mut grad = vec![0.0; weights.len()];
        if self.is_empty() {
            return grad;
        }
        for (x, y) in self.features.iter().zip(&self.targets) {
            let err = dot(weights, x) - y;
            for (g, xi) in grad.iter_mut().zip(x) {
                *g += 2.0 * err * xi;
            }
        }
        let n = self.len() as f64;
        grad.iter_mut().for_each(|g| *g /= n);
        grad
    }

    /// Mean squared error at `weights`
    pub fn loss(&self, weights: &[f64]) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .features
            .iter()
            .zip(&self.targets)
            .map(|(x, y)| (dot(weights, x) - y).powi(2))
            .sum();
        total / self.len() as f64
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
