//! HTTP server
//!
//! Axum router over the orchestrator's query surface.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::constants::CHAIN_NAME;
use crate::rpc::methods::{
    create_transaction, get_account_balance, get_account_transactions, get_block, get_block_after,
    get_recommended_fee, get_transaction, RpcState,
};

/// Routes under `/blockchain`
pub fn router(state: Arc<RpcState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(banner))
        .route("/blockchain/blocks/after", get(get_block_after))
        .route("/blockchain/blocks/get", get(get_block))
        .route("/blockchain/accounts/balance", get(get_account_balance))
        .route("/blockchain/accounts/transactions", get(get_account_transactions))
        .route("/blockchain/transactions/create", post(create_transaction))
        .route("/blockchain/transactions/get", get(get_transaction))
        .route("/blockchain/transactions/fee", get(get_recommended_fee))
        .layer(cors)
        .with_state(state)
}

async fn banner() -> &'static str {
    CHAIN_NAME
}

/// Serve the API on `0.0.0.0:port` until the task is dropped
pub async fn start_rpc_server(state: Arc<RpcState>, port: u16) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "http api listening");
    axum::serve(listener, router(state)).await
}
