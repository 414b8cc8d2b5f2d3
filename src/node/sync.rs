//! Startup catch-up from a remote node
//!
//! Starting at the local canonical tip, ask a [`BlockSource`] for the next
//! block, migrate it without gossip, and repeat until the source has
//! nothing newer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consensus::Block;
use crate::crypto::Hash;
use crate::node::{Blockchain, ChainError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote node unreachable: {0}")]
    Unavailable(String),
    #[error("remote request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote answered {status} for {url}")]
    Status { status: StatusCode, url: String },
    #[error("synced block {id} was not accepted: {reason}")]
    Rejected { id: Hash, reason: String },
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("sync task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl SyncError {
    /// Worth retrying after a pause
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Unavailable(_))
    }
}

/// Where synced blocks come from
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Canonical child of `parent_id`, `None` when the source has none
    async fn block_after(&self, parent_id: &Hash) -> Result<Option<Block>, SyncError>;
}

/// Another node's HTTP API
pub struct RemoteNode {
    client: Client,
    base_url: String,
}

impl RemoteNode {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(2))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl BlockSource for RemoteNode {
    async fn block_after(&self, parent_id: &Hash) -> Result<Option<Block>, SyncError> {
        let url = format!("{}/blockchain/blocks/after?id={}", self.base_url, parent_id.to_hex());
        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                SyncError::Unavailable(e.to_string())
            } else {
                SyncError::Http(e)
            }
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(SyncError::Status { status, url }),
        }
    }
}

/// An in-process node serves as a source directly
#[async_trait]
impl BlockSource for Arc<Blockchain> {
    async fn block_after(&self, parent_id: &Hash) -> Result<Option<Block>, SyncError> {
        let chain = Arc::clone(self);
        let parent_id = *parent_id;
        match tokio::task::spawn_blocking(move || Blockchain::block_after(&chain, &parent_id)).await? {
            Ok(block) => Ok(Some(block)),
            Err(ChainError::BlockNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Tries per request while the source is unreachable
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            attempts: 30,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Pull blocks from `source` onto the local canonical tip until it has
/// none left. Returns the number of blocks accepted.
pub async fn sync_from<S>(chain: &Arc<Blockchain>, source: &S, options: SyncOptions) -> Result<u64, SyncError>
where
    S: BlockSource + ?Sized,
{
    let mut synced = 0u64;

    loop {
        let local = Arc::clone(chain);
        let endpoint = tokio::task::spawn_blocking(move || local.best_endpoint()).await??;

        let Some(block) = fetch_with_retry(source, &endpoint.id, options).await? else {
            break;
        };
        let id = block.id;

        let local = Arc::clone(chain);
        let report = tokio::task::spawn_blocking(move || local.migrate_synced_block(block)).await??;
        if !report.inserted.contains(&id) {
            let reason = report
                .dropped
                .iter()
                .find(|(dropped, _)| *dropped == id)
                .map(|(_, reason)| reason.clone())
                .unwrap_or_else(|| "not attached to the local tip".to_string());
            return Err(SyncError::Rejected { id, reason });
        }

        synced += report.inserted.len() as u64;
        debug!(block = %id.short(), synced, "synced block");
    }

    info!(synced, "sync finished");
    Ok(synced)
}

async fn fetch_with_retry<S>(source: &S, parent_id: &Hash, options: SyncOptions) -> Result<Option<Block>, SyncError>
where
    S: BlockSource + ?Sized,
{
    let mut attempt = 1;
    loop {
        match source.block_after(parent_id).await {
            Err(e) if e.is_transient() && attempt < options.attempts => {
                warn!(error = %e, attempt, "sync source unreachable, retrying");
                attempt += 1;
                tokio::time::sleep(options.retry_delay).await;
            }
            other => return other,
        }
    }
}
