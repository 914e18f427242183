//! PeerChain Transport - WebSocket RPC between nodes
//!
//! Every call opens a fresh connection, sends one borsh-encoded request in a
//! binary frame and waits for a single Ack or Reject frame. Retries on
//! timeout are driven by the consensus retry policy.

pub mod client;
pub mod server;
pub mod wire;

pub use client::{PeerClient, PeerDirectory};
pub use server::PeerServer;
pub use wire::WireMessage;
