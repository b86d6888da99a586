//! Lockstep CLI
//!
//! Drives an in-process cluster of mutual-exclusion peers through a
//! contention workload and prints each peer's final state.

#![warn(missing_docs)]
#![warn(clippy::all)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use lockstep_core::PeerName;
use lockstep_directory::{Directory, MemoryDirectory};
use lockstep_peer::{MemoryTransport, MutexPeer, MutexService, PeerConfig, PeerError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "lockstep")]
#[command(about = "Distributed mutual exclusion over Ricart-Agrawala", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an in-process contention demo
    Demo {
        /// Number of peers
        #[arg(short, long, default_value_t = 3)]
        peers: usize,
        /// Critical-section entries per peer
        #[arg(short, long, default_value_t = 2)]
        rounds: usize,
        /// Hold time inside the critical section, in milliseconds
        #[arg(long, default_value_t = 200)]
        hold_ms: u64,
        /// Occupancy limit before auto-release, in milliseconds
        #[arg(long, default_value_t = 10_000)]
        access_limit_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("lockstep=info")
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Demo {
            peers,
            rounds,
            hold_ms,
            access_limit_ms,
        } => run_demo(peers, rounds, hold_ms, access_limit_ms).await,
    }
}

async fn run_demo(peers: usize, rounds: usize, hold_ms: u64, access_limit_ms: u64) -> Result<()> {
    let transport = Arc::new(MemoryTransport::new());
    let directory = Arc::new(MemoryDirectory::new());

    let mut nodes = Vec::new();
    for i in 1..=peers {
        let name = PeerName::new(format!("peer-{i}"))?;
        let address = format!("mem://peer-{i}");
        let config = PeerConfig::new(name.clone(), address.clone())
            .with_access_time_limit(access_limit_ms)
            .with_heartbeat_interval(500)
            .with_heartbeat_timeout(2_000)
            .with_reconcile_interval(500)
            .with_reply_timeout(10_000);

        let peer = MutexPeer::new(config, transport.clone(), directory.clone());
        directory.register(name, address.clone()).await?;
        transport
            .attach(address, peer.clone() as Arc<dyn MutexService>)
            .await;
        peer.start().await;
        nodes.push(peer);
    }
    for node in &nodes {
        node.reconcile().await;
    }
    info!(peers, rounds, hold_ms, "cluster up, starting contention");

    let mut workers = Vec::new();
    for node in &nodes {
        let node = node.clone();
        workers.push(tokio::spawn(async move {
            for round in 1..=rounds {
                loop {
                    match node.request_cs().await {
                        Ok(true) => break,
                        Ok(false) => {
                            warn!(peer = %node.name(), round, "denied after evictions, retrying");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                        Err(err) => {
                            warn!(peer = %node.name(), round, %err, "request failed, retrying");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
                info!(peer = %node.name(), round, "working inside the critical section");
                tokio::time::sleep(Duration::from_millis(hold_ms)).await;

                match node.release_cs().await {
                    Ok(()) => {}
                    // The occupancy timer beat us to it.
                    Err(PeerError::NotHolding) => {
                        warn!(peer = %node.name(), round, "auto-released before explicit release");
                    }
                    Err(err) => warn!(peer = %node.name(), round, %err, "release failed"),
                }
            }
        }));
    }
    for worker in workers {
        worker.await?;
    }

    for node in &nodes {
        let info = node.info().await;
        println!("{}", serde_json::to_string_pretty(&info)?);
        directory.remove(node.name()).await?;
        node.shutdown().await;
    }
    Ok(())
}
