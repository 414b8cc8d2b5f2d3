//! HTTP method implementations
//!
//! Each handler maps one route onto an orchestrator query. The orchestrator
//! locks synchronously, so calls run on the blocking pool. Failures are
//! returned as `{"error": reason}` with a matching status code.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::consensus::Block;
use crate::crypto::{Hash, PublicKey};
use crate::node::{AccountTransactions, Blockchain, ChainError, TransactionStatus};
use crate::validation::Transaction;

/// Handler state
pub struct RpcState {
    pub chain: Arc<Blockchain>,
}

impl RpcState {
    pub fn new(chain: Arc<Blockchain>) -> Arc<Self> {
        Arc::new(Self { chain })
    }

    /// Run `query` against the chain on the blocking pool
    async fn run<T, F>(&self, query: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&Blockchain) -> Result<T, ChainError> + Send + 'static,
    {
        let chain = Arc::clone(&self.chain);
        Ok(tokio::task::spawn_blocking(move || query(&chain)).await??)
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        error!(error = %e, "request handler panicked");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal error".to_string(),
        }
    }
}

impl From<ChainError> for ApiError {
    fn from(e: ChainError) -> Self {
        let status = match &e {
            ChainError::Duplicate(_) => StatusCode::CONFLICT,
            ChainError::BlockNotFound(_) | ChainError::TransactionNotFound(_) => StatusCode::NOT_FOUND,
            ChainError::Validation(_) | ChainError::Signature(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %e, "request failed");
        }
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct IdQuery {
    pub id: String,
}

impl IdQuery {
    fn hash(&self) -> Result<Hash, ApiError> {
        Hash::from_hex(&self.id).map_err(|_| ApiError::bad_request(format!("invalid id {:?}", self.id)))
    }
}

#[derive(Debug, Deserialize)]
pub struct AccountQuery {
    pub account: String,
}

impl AccountQuery {
    fn public_key(&self) -> Result<PublicKey, ApiError> {
        PublicKey::from_hex(&self.account)
            .map_err(|_| ApiError::bad_request(format!("invalid account {:?}", self.account)))
    }
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub account: PublicKey,
    pub balance: i128,
}

#[derive(Debug, Serialize)]
pub struct FeeResponse {
    pub fee: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountTransactionsResponse {
    pub account: PublicKey,
    pub pending_transactions: Vec<Transaction>,
    pub persisted_transactions: Vec<Transaction>,
}

/// `GET /blockchain/blocks/after?id=`
pub async fn get_block_after(
    State(state): State<Arc<RpcState>>,
    Query(query): Query<IdQuery>,
) -> Result<Json<Block>, ApiError> {
    let parent = query.hash()?;
    Ok(Json(state.run(move |chain| chain.block_after(&parent)).await?))
}

/// `GET /blockchain/blocks/get?id=`
pub async fn get_block(
    State(state): State<Arc<RpcState>>,
    Query(query): Query<IdQuery>,
) -> Result<Json<Block>, ApiError> {
    let id = query.hash()?;
    Ok(Json(state.run(move |chain| chain.block_by_id(&id)).await?))
}

/// `GET /blockchain/accounts/balance?account=`
pub async fn get_account_balance(
    State(state): State<Arc<RpcState>>,
    Query(query): Query<AccountQuery>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account = query.public_key()?;
    let balance = state.run(move |chain| chain.account_balance(&account)).await?;
    Ok(Json(BalanceResponse { account, balance }))
}

/// `GET /blockchain/accounts/transactions?account=`
pub async fn get_account_transactions(
    State(state): State<Arc<RpcState>>,
    Query(query): Query<AccountQuery>,
) -> Result<Json<AccountTransactionsResponse>, ApiError> {
    let account = query.public_key()?;
    let AccountTransactions { pending, persisted } =
        state.run(move |chain| chain.account_transactions(&account)).await?;
    Ok(Json(AccountTransactionsResponse {
        account,
        pending_transactions: pending,
        persisted_transactions: persisted,
    }))
}

/// `POST /blockchain/transactions/create`
pub async fn create_transaction(
    State(state): State<Arc<RpcState>>,
    Json(tx): Json<Transaction>,
) -> Result<(StatusCode, Json<Transaction>), ApiError> {
    let submitted = tx.clone();
    state.run(move |chain| chain.add_pending_transaction(submitted)).await?;
    debug!(tx = %tx.id.short(), "transaction submitted over http");
    Ok((StatusCode::CREATED, Json(tx)))
}

/// `GET /blockchain/transactions/get?id=`
pub async fn get_transaction(
    State(state): State<Arc<RpcState>>,
    Query(query): Query<IdQuery>,
) -> Result<(StatusCode, Json<Transaction>), ApiError> {
    let id = query.hash()?;
    let status = state.run(move |chain| chain.transaction_status(&id)).await?;
    let code = match status {
        TransactionStatus::Pending(_) => StatusCode::ACCEPTED,
        TransactionStatus::Finalized(_) | TransactionStatus::Accepted(_) => StatusCode::OK,
    };
    Ok((code, Json(status.transaction().clone())))
}

/// `GET /blockchain/transactions/fee`
pub async fn get_recommended_fee(State(state): State<Arc<RpcState>>) -> Result<Json<FeeResponse>, ApiError> {
    let fee = state.run(|chain| Ok(chain.recommended_fee())).await?;
    Ok(Json(FeeResponse { fee }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;
    use crate::crypto::PrivateKey;
    use crate::node::{create_genesis_block, EventBus, GenesisConfig};
    use crate::p2p::PeerHub;
    use crate::storage::MemoryLedger;

    fn state(key: &PrivateKey) -> Arc<RpcState> {
        let genesis = create_genesis_block(&GenesisConfig::with_stakeholders(vec![key.public_key()]));
        let ledger = Arc::new(MemoryLedger::with_genesis(&genesis).unwrap());
        let chain = Blockchain::new(
            ledger,
            Arc::new(PeerHub::new().join()),
            EventBus::default(),
            key.clone(),
            ChainConfig::default(),
        );
        RpcState::new(Arc::new(chain))
    }

    fn id_query(id: &Hash) -> Query<IdQuery> {
        Query(IdQuery { id: id.to_hex() })
    }

    #[tokio::test]
    async fn test_transaction_submission_statuses() {
        let key = PrivateKey::generate();
        let state = state(&key);
        let tx = Transaction::new(key.public_key(), key.public_key(), 5, 1, 0).signed(&key).unwrap();

        let (code, _) = create_transaction(State(state.clone()), Json(tx.clone())).await.unwrap();
        assert_eq!(code, StatusCode::CREATED);

        let duplicate = create_transaction(State(state.clone()), Json(tx.clone())).await.unwrap_err();
        assert_eq!(duplicate.status, StatusCode::CONFLICT);

        let mut tampered = tx.clone();
        tampered.fee = 0;
        let invalid = create_transaction(State(state.clone()), Json(tampered)).await.unwrap_err();
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);

        let (code, Json(found)) = get_transaction(State(state.clone()), id_query(&tx.id)).await.unwrap();
        assert_eq!(code, StatusCode::ACCEPTED);
        assert_eq!(found, tx);

        let missing = get_transaction(State(state.clone()), id_query(&Hash::random())).await.unwrap_err();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let Json(fee) = get_recommended_fee(State(state)).await.unwrap();
        assert_eq!(fee.fee, 1);
    }

    #[tokio::test]
    async fn test_finalized_grant_and_balance() {
        let key = PrivateKey::generate();
        let state = state(&key);
        let grant = Transaction::default_genesis_grant(key.public_key());

        let (code, _) = get_transaction(State(state.clone()), id_query(&grant.id)).await.unwrap();
        assert_eq!(code, StatusCode::OK);

        let Json(balance) = get_account_balance(
            State(state.clone()),
            Query(AccountQuery { account: key.public_key().to_hex() }),
        )
        .await
        .unwrap();
        assert_eq!(balance.balance, 100_000);

        let bad = get_account_balance(State(state), Query(AccountQuery { account: "xyz".into() }))
            .await
            .unwrap_err();
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_account_transactions_listed() {
        let key = PrivateKey::generate();
        let state = state(&key);
        let grant = Transaction::default_genesis_grant(key.public_key());
        let tx = Transaction::new(key.public_key(), PrivateKey::generate().public_key(), 5, 1, 0)
            .signed(&key)
            .unwrap();
        create_transaction(State(state.clone()), Json(tx.clone())).await.unwrap();

        let query = || Query(AccountQuery { account: key.public_key().to_hex() });
        let Json(listed) = get_account_transactions(State(state.clone()), query()).await.unwrap();
        assert_eq!(listed.account, key.public_key());
        assert_eq!(listed.pending_transactions, vec![tx]);
        assert_eq!(listed.persisted_transactions, vec![grant]);

        let body = serde_json::to_value(&listed).unwrap();
        assert!(body.get("pendingTransactions").is_some());
        assert!(body.get("persistedTransactions").is_some());

        let bad = get_account_transactions(State(state), Query(AccountQuery { account: "00".into() }))
            .await
            .unwrap_err();
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_block_lookups() {
        let key = PrivateKey::generate();
        let state = state(&key);

        let Json(genesis) = get_block(State(state.clone()), id_query(&Hash::zero())).await.unwrap();
        assert_eq!(genesis.height, 0);

        let after = get_block_after(State(state.clone()), id_query(&genesis.id)).await.unwrap_err();
        assert_eq!(after.status, StatusCode::NOT_FOUND);

        let malformed = get_block(State(state), Query(IdQuery { id: "nope".into() })).await.unwrap_err();
        assert_eq!(malformed.status, StatusCode::BAD_REQUEST);
    }
}
