//! Service entry-point: load configuration, initialise tracing, wire the
//! execution pipeline, serve the action endpoints.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use fx_engine::{
    api::{self, ApiState},
    auth::RequestAuthenticator,
    chain::RpcChainClient,
    config::{Config, EXECUTOR_KEY_ENV},
    deposit::DepositVerifier,
    idempotency::IdempotencyCache,
    nonce_ledger::NonceLedger,
    notifier::Notifier,
    orchestrator::TransactionOrchestrator,
    orders::OrderBook,
    price_feeds::{CryptoRateFeed, ForexRateFeed},
    quotes::{HttpVenueQuoteSource, QuoteAggregator, VenueQuoteSource},
    store::{MemoryStore, SystemClock},
    vault::VaultLedger,
};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let config_path =
        std::env::var("FX_ENGINE_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let config = Arc::new(match tokio::fs::try_exists(&config_path).await {
        Ok(true) => Config::from_file(&config_path).await?,
        _ => {
            let mut cfg = Config::default();
            cfg.apply_env_overrides();
            cfg
        }
    });

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fx_engine={}", config.log_level)))
        .add_directive("ethers_providers=warn".parse()?)
        .add_directive("hyper=warn".parse()?);
    tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();

    info!("starting fx-engine");

    let executor_key = std::env::var(EXECUTOR_KEY_ENV)
        .map_err(|_| eyre::eyre!("{EXECUTOR_KEY_ENV} must be set"))?;
    let chain = Arc::new(RpcChainClient::new(config.chain.clone(), &executor_key)?);
    info!(executor = ?fx_engine::chain::ChainClient::executor_address(chain.as_ref()), "chain client ready");

    let clock = Arc::new(SystemClock);
    let nonce_store = Arc::new(MemoryStore::new(clock.clone()));
    let idempotency_store = Arc::new(MemoryStore::new(clock.clone()));

    let nonce_ledger =
        Arc::new(NonceLedger::new(nonce_store, clock.clone(), config.auth.skew_window()));
    let authenticator = Arc::new(RequestAuthenticator::new(
        config.auth.clone(),
        nonce_ledger,
        clock.clone(),
    ));
    let idempotency = Arc::new(IdempotencyCache::new(
        idempotency_store,
        config.idempotency.ttl(),
        config.idempotency.max_entries,
    ));

    let venue_timeout = Duration::from_millis(config.quotes.venue_timeout_ms);
    let venues: Vec<Arc<dyn VenueQuoteSource>> = config
        .quotes
        .venues
        .iter()
        .map(|endpoint| {
            Arc::new(HttpVenueQuoteSource::new(endpoint, venue_timeout)) as Arc<dyn VenueQuoteSource>
        })
        .collect();
    info!(venues = venues.len(), "quote venues configured");
    let gas_price_feed = Arc::new(CryptoRateFeed::new(&config.feeds));
    let forex_feed = Arc::new(ForexRateFeed::new(&config.feeds));
    let quotes =
        Arc::new(QuoteAggregator::new(venues, config.quotes.clone(), gas_price_feed));

    let orchestrator = Arc::new(TransactionOrchestrator::new(chain.clone()));
    let deposit_verifier = Arc::new(DepositVerifier::new(chain.clone(), config.vault.clone()));
    let vault = Arc::new(VaultLedger::new(chain, config.vault.clone()));
    let orders = Arc::new(OrderBook::new());
    let notifier = Notifier::new(config.feeds.notification_webhook.clone());

    let state = ApiState {
        config: config.clone(),
        authenticator,
        idempotency,
        quotes,
        forex_feed,
        orchestrator,
        deposit_verifier,
        vault,
        orders,
        notifier,
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    info!(bind = %config.server.bind_address, "serving action endpoints");
    axum::serve(listener, api::router(state)).await?;
    Ok(())
}
