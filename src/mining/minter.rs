//! Block minter
//!
//! Periodically asks the chain for a block on the canonical tip. Most
//! attempts lose the stake lottery; those are silent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::consensus::ProofError;
use crate::node::{Blockchain, ChainError, MigrationReport};

/// Outcome of one minting attempt
#[derive(Debug)]
pub enum MintOutcome {
    /// A block was minted and reconciled
    Minted(MigrationReport),
    /// The hit was above the upper bound this round
    NotOurTurn,
    /// The local account holds no stake
    NoStake,
    /// The local clock has not advanced past the tip
    TooEarly,
}

#[derive(Clone)]
pub struct Minter {
    chain: Arc<Blockchain>,
    interval: Duration,
    stop_signal: Arc<AtomicBool>,
}

impl Minter {
    pub fn new(chain: Arc<Blockchain>) -> Self {
        let interval = chain.config().mint_interval;
        Self {
            chain,
            interval,
            stop_signal: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_signal)
    }

    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.stop_signal.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// One minting attempt. Lottery losses are outcomes, not errors.
    pub fn mint_once(&self) -> Result<MintOutcome, ChainError> {
        match self.chain.mint_and_migrate() {
            Ok(report) => Ok(MintOutcome::Minted(report)),
            Err(ChainError::Proof(ProofError::HitAboveUpperBound { .. })) => Ok(MintOutcome::NotOurTurn),
            Err(ChainError::Proof(ProofError::NoStake { .. })) => Ok(MintOutcome::NoStake),
            Err(ChainError::Proof(ProofError::TimestampBeforeParent { .. }))
            | Err(ChainError::Proof(ProofError::DegenerateTarget)) => Ok(MintOutcome::TooEarly),
            Err(e) => Err(e),
        }
    }

    /// Mint every interval until stopped
    pub async fn run_continuous_minting(&self) {
        info!(interval_ms = self.interval.as_millis() as u64, "minter started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while !self.is_stopped() {
            ticker.tick().await;
            if self.is_stopped() {
                break;
            }

            let minter = self.clone();
            let attempt = tokio::task::spawn_blocking(move || minter.mint_once()).await;
            match attempt {
                Ok(Ok(MintOutcome::Minted(report))) => {
                    debug!(inserted = report.inserted.len(), finalized = report.finalized.len(), "mint round won");
                }
                Ok(Ok(MintOutcome::NotOurTurn)) => trace!("hit above upper bound"),
                Ok(Ok(MintOutcome::NoStake)) => trace!("no stake to mint with"),
                Ok(Ok(MintOutcome::TooEarly)) => trace!("clock has not passed the tip"),
                Ok(Err(e)) => warn!(error = %e, "minting failed"),
                Err(e) => error!(error = %e, "minting task panicked"),
            }
        }
        info!("minter stopped");
    }
}
