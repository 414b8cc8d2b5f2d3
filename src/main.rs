//! Stakechain Node
//!
//! Main entry point for running a proof-of-stake node.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stakechain::config::Cli;
use stakechain::crypto::PrivateKey;
use stakechain::mining::Minter;
use stakechain::node::{
    create_genesis_block, sync_from, Blockchain, Event, EventBus, GenesisConfig, RemoteNode, SyncOptions, Topic,
};
use stakechain::p2p::{listen, PeerHub, PeerNetwork};
use stakechain::rpc::{start_rpc_server, RpcState};
use stakechain::storage::{Ledger, SledLedger};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let key = match &cli.key {
        Some(hex) => PrivateKey::from_hex(hex)?,
        None => {
            warn!("no signing key configured, generated an ephemeral one");
            PrivateKey::generate()
        }
    };
    let public_key = key.public_key();

    let mut stakeholders = cli.genesis_stakeholders()?;
    if stakeholders.is_empty() {
        stakeholders.push(public_key);
    }
    let genesis = create_genesis_block(&GenesisConfig::with_stakeholders(stakeholders));

    let ledger = SledLedger::open(&cli.data_dir)?;
    ledger.ensure_genesis(&genesis)?;
    info!(
        data_dir = %cli.data_dir.display(),
        blocks = ledger.block_count()?,
        stakeholders = genesis.transactions.len(),
        "ledger opened"
    );

    let hub = PeerHub::new();
    let peer = hub.join();
    let inbox = peer.subscribe();

    let events = EventBus::default();
    let chain = Arc::new(Blockchain::new(
        Arc::new(ledger),
        Arc::new(peer),
        events.clone(),
        key,
        cli.chain_config(),
    ));
    info!(account = %public_key, "node key loaded");

    tokio::spawn(listen(Arc::clone(&chain), inbox));

    for topic in Topic::ALL {
        let mut receiver = events.subscribe(topic);
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(Event::Block(block)) => {
                        debug!(%topic, block = %block.id.short(), height = block.height, "event")
                    }
                    Ok(Event::Transaction(tx)) => debug!(%topic, tx = %tx.id.short(), "event"),
                    Err(RecvError::Lagged(skipped)) => warn!(%topic, skipped, "event observer lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    if let Some(remote) = &cli.sync_remote {
        let source = RemoteNode::new(remote.as_str())?;
        info!(remote = %source.base_url(), "syncing from remote node");
        match sync_from(&chain, &source, SyncOptions::default()).await {
            Ok(synced) => info!(synced, remote = %source.base_url(), "caught up with remote node"),
            Err(e) => warn!(error = %e, remote = %source.base_url(), "sync stopped, continuing from local chain"),
        }
    }

    let minter = Minter::new(Arc::clone(&chain));
    let minting = {
        let minter = minter.clone();
        tokio::spawn(async move { minter.run_continuous_minting().await })
    };

    let rpc_state = RpcState::new(Arc::clone(&chain));
    let port = cli.http_port;
    tokio::spawn(async move {
        if let Err(e) = start_rpc_server(rpc_state, port).await {
            error!(error = %e, port, "http api stopped");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping node");
    minter.stop();
    if let Err(e) = minting.await {
        error!(error = %e, "minter task failed");
    }

    Ok(())
}
