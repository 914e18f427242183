//! Transport seams
//!
//! `PeerTransport` is the outbound side: a call returns once the peer has
//! acknowledged, retrying timeouts internally. `MessageHandler` is the
//! inbound side: both operations must return immediately and finish their
//! work in the background.

use crate::error::TransportError;
use crate::types::{Block, NodeId, Update};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Deliver an update to `peer` (the round's verifier)
    async fn verify_update(&self, peer: NodeId, update: &Update) -> Result<(), TransportError>;

    /// Deliver a block to `peer`
    async fn register_block(&self, peer: NodeId, block: &Block) -> Result<(), TransportError>;
}

pub trait MessageHandler: Send + Sync + 'static {
    /// Inbound `VerifyUpdate`
    fn on_verify_update(self: Arc<Self>, update: Update);

    /// Inbound `RegisterBlock`
    fn on_register_block(self: Arc<Self>, block: Block);
}
