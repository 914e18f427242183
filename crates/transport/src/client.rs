//! Outbound side of the RPC transport

use crate::wire::WireMessage;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use peerchain_consensus::{
    call_with_retry, Block, NodeId, PeerTransport, RetryPolicy, TransportError, Update,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Node id -> `host:port`
#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    addrs: HashMap<NodeId, String>,
}

impl PeerDirectory {
    /// Node `i` listens on `host:(base_port + i)`
    pub fn contiguous(host: &str, base_port: u16, total_nodes: u32) -> anyhow::Result<Self> {
        let mut addrs = HashMap::new();
        for id in 0..total_nodes {
            let port = u16::try_from(u32::from(base_port) + id)
                .map_err(|_| anyhow::anyhow!("port for node {} exceeds 65535", id))?;
            addrs.insert(id, format!("{}:{}", host, port));
        }
        Ok(Self { addrs })
    }

    pub fn from_addrs(addrs: impl IntoIterator<Item = (NodeId, String)>) -> Self {
        Self {
            addrs: addrs.into_iter().collect(),
        }
    }

    pub fn addr(&self, id: NodeId) -> Option<&str> {
        self.addrs.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

/// WebSocket `PeerTransport`: one connection per attempt
pub struct PeerClient {
    directory: PeerDirectory,
    policy: Arc<dyn RetryPolicy>,
}

impl PeerClient {
    pub fn new(directory: PeerDirectory, policy: Arc<dyn RetryPolicy>) -> Self {
        Self { directory, policy }
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    async fn call(&self, peer: NodeId, request: WireMessage) -> Result<(), TransportError> {
        let addr = self
            .directory
            .addr(peer)
            .ok_or(TransportError::UnknownPeer(peer))?;
        let frame = request.to_bytes().map_err(|e| TransportError::Call {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

        let attempts = call_with_retry(self.policy.as_ref(), addr, || {
            call_once(addr, frame.clone())
        })
        .await?;
        tracing::debug!(
            "{} acknowledged by node {} after {} attempt(s)",
            request.name(),
            peer,
            attempts
        );
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for PeerClient {
    async fn verify_update(&self, peer: NodeId, update: &Update) -> Result<(), TransportError> {
        self.call(peer, WireMessage::VerifyUpdate(update.clone()))
            .await
    }

    async fn register_block(&self, peer: NodeId, block: &Block) -> Result<(), TransportError> {
        self.call(peer, WireMessage::RegisterBlock(block.clone()))
            .await
    }
}

/// Connect, send one request frame, wait for the reply, close.
///
/// Dropping the returned future mid-flight drops the connection with it.
async fn call_once(addr: &str, frame: Vec<u8>) -> Result<(), TransportError> {
    let call_err = |reason: String| TransportError::Call {
        addr: addr.to_string(),
        reason,
    };

    let url = format!("ws://{}", addr);
    let (ws_stream, _) = connect_async(&url)
        .await
        .map_err(|e| TransportError::Connect {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    ws_sender
        .send(Message::Binary(frame))
        .await
        .map_err(|e| call_err(e.to_string()))?;

    let reply = loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Binary(data))) => break data,
            Some(Ok(Message::Close(_))) | None => {
                return Err(call_err("connection closed before reply".to_string()))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(call_err(e.to_string())),
        }
    };

    let _ = ws_sender.send(Message::Close(None)).await;

    match WireMessage::from_bytes(&reply).map_err(|e| call_err(e.to_string()))? {
        WireMessage::Ack => Ok(()),
        WireMessage::Reject { reason } => Err(TransportError::Rejected {
            addr: addr.to_string(),
            reason,
        }),
        other => Err(call_err(format!("unexpected reply {}", other.name()))),
    }
}
