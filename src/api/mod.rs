//! HTTP action endpoints for the execution engine.

pub mod handlers;
pub mod responses;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::auth::RequestAuthenticator;
use crate::config::Config;
use crate::deposit::DepositVerifier;
use crate::idempotency::IdempotencyCache;
use crate::notifier::Notifier;
use crate::orchestrator::TransactionOrchestrator;
use crate::orders::OrderBook;
use crate::price_feeds::PriceFeed;
use crate::quotes::QuoteAggregator;
use crate::vault::VaultLedger;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<Config>,
    pub authenticator: Arc<RequestAuthenticator>,
    pub idempotency: Arc<IdempotencyCache>,
    pub quotes: Arc<QuoteAggregator>,
    /// Fiat reference rates for converting notionals into USD.
    pub forex_feed: Arc<dyn PriceFeed>,
    pub orchestrator: Arc<TransactionOrchestrator>,
    pub deposit_verifier: Arc<DepositVerifier>,
    pub vault: Arc<VaultLedger>,
    pub orders: Arc<OrderBook>,
    pub notifier: Notifier,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/arbitrage/execute", post(handlers::execute_arbitrage))
        .route("/remittance/execute", post(handlers::execute_remittance))
        .route("/vault/deposit", post(handlers::vault_deposit))
        .route("/vault/withdraw", post(handlers::vault_withdraw))
        .route("/vault/metrics", get(handlers::vault_metrics))
        .route("/orders", post(handlers::create_order))
        .route("/orders/:id", delete(handlers::cancel_order))
        .route("/trades/:id", get(handlers::get_trade))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(state)
}
