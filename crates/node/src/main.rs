//! PeerChain node
//!
//! Runs one participant of a round-based training network. Node `i` of
//! `total` listens on `host:(base_port + i)`; every other node is expected
//! at the neighbouring ports. The node exits once its learner reports
//! convergence and writes its chain to stdout.

use anyhow::Result;
use clap::{error::ErrorKind, CommandFactory, Parser};
use peerchain_consensus::{RoundNode, UnboundedRetry};
use peerchain_learning::LinearLearner;
use peerchain_transport::{PeerClient, PeerDirectory, PeerServer};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod emit;

use config::{NodeConfig, OutputFormat};
use emit::ChainReport;

/// PeerChain round-based training node
#[derive(Parser, Debug)]
#[command(name = "peerchain")]
#[command(about = "Round-based peer coordination for distributed training", long_about = None)]
struct Args {
    /// Number of nodes in the network
    #[arg(short = 't', long)]
    total_nodes: u32,

    /// This node's index (0-based)
    #[arg(short = 'i', long)]
    node_index: u32,

    /// Dataset identifier
    #[arg(short = 'd', long)]
    dataset: String,

    /// Host every node listens on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port of node 0; node i listens on base-port + i
    #[arg(long, default_value = "8000")]
    base_port: u16,

    /// Per-attempt RPC timeout in seconds
    #[arg(long, default_value = "10")]
    rpc_timeout_secs: u64,

    /// Stop after this many blocks
    #[arg(long, default_value = "100")]
    max_iterations: usize,

    /// Stop once a block moves the model less than this
    #[arg(long, default_value = "0.0001")]
    tolerance: f64,

    /// Chain output format
    #[arg(long, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn node_config(&self) -> NodeConfig {
        NodeConfig {
            total_nodes: self.total_nodes,
            node_index: self.node_index,
            dataset: self.dataset.clone(),
            host: self.host.clone(),
            base_port: self.base_port,
            rpc_timeout_secs: self.rpc_timeout_secs,
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            output: self.output,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = args.node_config();
    if let Err(e) = config.validate() {
        Args::command()
            .error(ErrorKind::ValueValidation, format!("{:#}", e))
            .exit();
    }

    if let Err(e) = run(config).await {
        tracing::error!("Node stopped: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(config: NodeConfig) -> Result<()> {
    tracing::info!("Starting PeerChain node {}/{}", config.node_index, config.total_nodes);
    tracing::info!("  Dataset: {}", config.dataset);
    tracing::info!("  Listening: {}", config.listen_addr());
    tracing::info!("  RPC timeout: {}s", config.rpc_timeout_secs);
    tracing::info!("  Max iterations: {}", config.max_iterations);

    let learner = Arc::new(LinearLearner::new(config.node_index, config.learner())?);
    let directory = PeerDirectory::contiguous(&config.host, config.base_port, config.total_nodes)?;
    let client = PeerClient::new(
        directory,
        Arc::new(UnboundedRetry::new(config.rpc_timeout())),
    );

    let node = RoundNode::new(config.consensus(), learner, Arc::new(client))?;

    // Inbound side first so peers can reach us before our first round
    let server = PeerServer::bind(&config.listen_addr()).await?;
    let listener = server.spawn(node.clone());

    let result = node.clone().run().await;
    listener.abort();
    let chain = result?;

    tracing::info!("Converged with {} blocks", chain.len());

    let report = ChainReport {
        node_id: config.node_index,
        total_nodes: config.total_nodes,
        dataset: config.dataset.clone(),
        finished_at: chrono::Utc::now(),
        blocks: chain.records(|payload| node.describe_payload(payload)),
        stats: node.stats(),
    };
    println!("{}", report.render(config.output)?.trim_end());
    Ok(())
}
