//! PeerChain Learning - the default `Learner`
//!
//! Each node trains a linear model on its own synthetic shard. Updates are
//! gradient steps against the weights in the chain head, blocks carry the
//! averaged model.

pub mod dataset;
pub mod model;

pub use dataset::Dataset;
pub use model::{decode_weights, encode_weights, LearnerConfig, LearnerError, LinearLearner};
