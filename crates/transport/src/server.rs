//! Inbound side of the RPC transport
//!
//! One task per connection. Every request frame is decoded, handed to the
//! node's `MessageHandler` (which returns immediately) and answered with an
//! `Ack`. Undecodable frames are answered with `Reject`.

use crate::wire::WireMessage;
use futures_util::{SinkExt, StreamExt};
use peerchain_consensus::MessageHandler;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub struct PeerServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl PeerServer {
    /// Bind the listening socket. Nothing is served until `spawn`.
    pub async fn bind(addr: &str) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start the accept loop, dispatching requests to `handler`
    pub fn spawn(self, handler: Arc<dyn MessageHandler>) -> JoinHandle<()> {
        let listener = self.listener;
        tracing::info!("Peer server listening on {}", self.local_addr);

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        tracing::trace!("Connection from {}", peer_addr);
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, handler).await {
                                tracing::warn!("Connection error from {}: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
        })
    }
}

async fn handle_connection(
    stream: TcpStream,
    handler: Arc<dyn MessageHandler>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Binary(data)) => {
                let reply = dispatch(&data, &handler);
                ws_sender.send(Message::Binary(reply.to_bytes()?)).await?;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    Ok(())
}

fn dispatch(data: &[u8], handler: &Arc<dyn MessageHandler>) -> WireMessage {
    match WireMessage::from_bytes(data) {
        Ok(WireMessage::VerifyUpdate(update)) => {
            tracing::debug!(
                "Received update from node {} for iteration {}",
                update.sender_id,
                update.iteration
            );
            handler.clone().on_verify_update(update);
            WireMessage::Ack
        }
        Ok(WireMessage::RegisterBlock(block)) => {
            tracing::debug!(
                "Received block {} for iteration {} from node {}",
                block.short_hash(),
                block.iteration,
                block.producer_id
            );
            handler.clone().on_register_block(block);
            WireMessage::Ack
        }
        Ok(other) => WireMessage::Reject {
            reason: format!("{} is not a request", other.name()),
        },
        Err(e) => {
            tracing::warn!("Undecodable frame ({} bytes): {}", data.len(), e);
            WireMessage::Reject {
                reason: format!("malformed frame: {}", e),
            }
        }
    }
}
