//! End-to-end pipeline through the action handlers: authentication,
//! idempotent short-circuit, quoting, orchestration, response caching.

mod common;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use serde_json::Value;
use common::mocks::MockChainClient;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use std::sync::Arc;
use std::time::Duration;

use fx_engine::api::handlers::{self, ArbitrageRequest, CreateOrderRequest};
use fx_engine::api::ApiState;
use fx_engine::auth::{canonical_message, RequestAuthenticator};
use fx_engine::config::{AuthSettings, Config, QuoteSettings};
use fx_engine::deposit::DepositVerifier;
use fx_engine::errors::{EngineError, QuoteError};
use fx_engine::idempotency::IdempotencyCache;
use fx_engine::nonce_ledger::NonceLedger;
use fx_engine::notifier::Notifier;
use fx_engine::orchestrator::TransactionOrchestrator;
use fx_engine::orders::OrderBook;
use fx_engine::price_feeds::StaticFeed;
use fx_engine::quotes::{QuoteAggregator, VenueQuoteSource};
use fx_engine::store::{ManualClock, MemoryStore};
use fx_engine::types::{AuthPayload, OrderSide, VenueQuote};
use fx_engine::vault::VaultLedger;

const AGENT_SECRET: &str = "integration-test-agent-credential";
const T0: i64 = 1_700_000_000;

#[derive(Debug)]
struct FixedVenue {
    name: String,
    rate: f64,
}

#[async_trait]
impl VenueQuoteSource for FixedVenue {
    fn name(&self) -> &str {
        &self.name
    }

    fn router_address(&self) -> Address {
        Address::repeat_byte(0xaa)
    }

    async fn quote(
        &self,
        _pair: &str,
        _from: Address,
        _to: Address,
        amount_in: U256,
    ) -> Result<VenueQuote, QuoteError> {
        Ok(VenueQuote {
            venue: self.name.clone(),
            rate: self.rate,
            amount_out: amount_in,
            gas_estimate: U256::from(150_000u64),
        })
    }
}

fn build_state(rates: &[(&str, f64)]) -> (ApiState, Arc<MockChainClient>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0));
    let chain = Arc::new(MockChainClient::new(Address::repeat_byte(0xee)));
    chain.set_balance(Address::repeat_byte(0x01), U256::from(u64::MAX));
    chain.set_balance(Address::repeat_byte(0x02), U256::from(u64::MAX));

    let mut config = Config::default();
    config.auth = AuthSettings {
        agent_secret: Some(AGENT_SECRET.to_string()),
        max_clock_skew_secs: 300,
        min_secret_len: 8,
    };
    config.quotes = QuoteSettings {
        base_floor_pct: 0.3,
        slippage_buffer_pct: 0.0,
        safety_margin_pct: 0.0,
        min_absolute_profit_usd: 0.0,
        ..QuoteSettings::default()
    };
    let config = Arc::new(config);

    let nonce_store = Arc::new(MemoryStore::new(clock.clone()));
    let idem_store = Arc::new(MemoryStore::new(clock.clone()));
    let nonce_ledger =
        Arc::new(NonceLedger::new(nonce_store, clock.clone(), Duration::from_secs(300)));
    let authenticator = Arc::new(RequestAuthenticator::new(
        config.auth.clone(),
        nonce_ledger,
        clock.clone(),
    ));
    let idempotency =
        Arc::new(IdempotencyCache::new(idem_store, Duration::from_secs(1200), 1_000));

    let venues: Vec<Arc<dyn VenueQuoteSource>> = rates
        .iter()
        .map(|(name, rate)| {
            Arc::new(FixedVenue { name: name.to_string(), rate: *rate }) as Arc<dyn VenueQuoteSource>
        })
        .collect();
    let quotes = Arc::new(QuoteAggregator::new(
        venues,
        config.quotes.clone(),
        Arc::new(StaticFeed { fixed_rate: 2_000.0 }),
    ));

    let state = ApiState {
        config: config.clone(),
        authenticator,
        idempotency,
        quotes,
        forex_feed: Arc::new(StaticFeed { fixed_rate: 1.0 }),
        orchestrator: Arc::new(TransactionOrchestrator::new(chain.clone())),
        deposit_verifier: Arc::new(DepositVerifier::new(chain.clone(), config.vault.clone())),
        vault: Arc::new(VaultLedger::new(chain.clone(), config.vault.clone())),
        orders: Arc::new(OrderBook::new()),
        notifier: Notifier::new(None),
    };
    (state, chain, clock)
}

fn agent_auth() -> AuthPayload {
    AuthPayload::TrustedAgent { token: AGENT_SECRET.to_string() }
}

async fn body_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn arbitrage_request(key: Option<&str>) -> ArbitrageRequest {
    ArbitrageRequest {
        pair: "EURC/USDC".to_string(),
        from_token: Address::repeat_byte(0x01),
        to_token: Address::repeat_byte(0x02),
        // 1M USDC at 6 decimals, so the gas-derived threshold component is
        // negligible next to the venue spread
        amount: "1000000000000".to_string(),
        buy_venue: None,
        sell_venue: None,
        idempotency_key: key.map(|k| k.to_string()),
        auth: agent_auth(),
    }
}

#[tokio::test]
async fn replayed_idempotency_key_serves_cache_without_reexecuting() {
    let (state, chain, _clock) = build_state(&[("alpha", 1.02), ("beta", 1.0)]);

    let response = handlers::execute_arbitrage(
        State(state.clone()),
        HeaderMap::new(),
        Json(arbitrage_request(Some("idem-1"))),
    )
    .await
    .unwrap();
    let (status, first) = body_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["idempotent"], false);
    assert_eq!(chain.submission_count(), 4);

    let response = handlers::execute_arbitrage(
        State(state.clone()),
        HeaderMap::new(),
        Json(arbitrage_request(Some("idem-1"))),
    )
    .await
    .unwrap();
    let (_, replay) = body_json(response).await;
    assert_eq!(replay["idempotent"], true);
    assert_eq!(replay["trade_id"], first["trade_id"]);
    // no side effects re-executed
    assert_eq!(chain.submission_count(), 4);

    // a different key executes afresh
    let response = handlers::execute_arbitrage(
        State(state),
        HeaderMap::new(),
        Json(arbitrage_request(Some("idem-2"))),
    )
    .await
    .unwrap();
    let (_, fresh) = body_json(response).await;
    assert_ne!(fresh["trade_id"], first["trade_id"]);
    assert_eq!(chain.submission_count(), 8);
}

#[tokio::test]
async fn idempotency_key_can_arrive_via_header() {
    let (state, chain, _clock) = build_state(&[("alpha", 1.02), ("beta", 1.0)]);
    let mut headers = HeaderMap::new();
    headers.insert("x-idempotency-key", "from-header".parse().unwrap());

    handlers::execute_arbitrage(
        State(state.clone()),
        headers.clone(),
        Json(arbitrage_request(None)),
    )
    .await
    .unwrap();
    let response =
        handlers::execute_arbitrage(State(state), headers, Json(arbitrage_request(None)))
            .await
            .unwrap();
    let (_, replay) = body_json(response).await;
    assert_eq!(replay["idempotent"], true);
    assert_eq!(chain.submission_count(), 4);
}

#[tokio::test]
async fn partial_failure_replays_from_cache_instead_of_reexecuting() {
    let (state, chain, _clock) = build_state(&[("alpha", 1.02), ("beta", 1.0)]);
    // leg 2's swap (submission 4) fails after leg 1 settled
    chain.fail_submission(4, "execution reverted: insufficient output amount");

    let response = handlers::execute_arbitrage(
        State(state.clone()),
        HeaderMap::new(),
        Json(arbitrage_request(Some("idem-1"))),
    )
    .await
    .unwrap();
    let (status, first) = body_json(response).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(first["error"], "partial_execution_failure");
    assert_eq!(first["retryable"], false);
    assert!(first["completed_leg_tx_hashes"].as_array().unwrap().len() >= 1);
    let executed = chain.submission_count();

    // the same key must see the original failure, not a re-run
    let response = handlers::execute_arbitrage(
        State(state),
        HeaderMap::new(),
        Json(arbitrage_request(Some("idem-1"))),
    )
    .await
    .unwrap();
    let (status, replay) = body_json(response).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(replay["idempotent"], true);
    assert_eq!(replay["completed_leg_tx_hashes"], first["completed_leg_tx_hashes"]);
    assert_eq!(chain.submission_count(), executed);
}

#[tokio::test]
async fn thin_spread_is_rejected_before_any_submission() {
    let (state, chain, _clock) = build_state(&[("alpha", 1.0005), ("beta", 1.0)]);

    let err = handlers::execute_arbitrage(
        State(state),
        HeaderMap::new(),
        Json(arbitrage_request(Some("idem-1"))),
    )
    .await
    .unwrap_err();

    match err.0 {
        EngineError::Quote(QuoteError::NotProfitable { spread_pct, threshold_pct }) => {
            assert!(spread_pct < threshold_pct);
        }
        other => panic!("expected NotProfitable, got {other:?}"),
    }
    assert_eq!(chain.submission_count(), 0);
}

#[tokio::test]
async fn bad_agent_credential_is_undifferentiated_unauthorized() {
    let (state, chain, _clock) = build_state(&[("alpha", 1.02), ("beta", 1.0)]);
    let mut request = arbitrage_request(None);
    request.auth = AuthPayload::TrustedAgent { token: "wrong-credential-here".to_string() };

    let err =
        handlers::execute_arbitrage(State(state), HeaderMap::new(), Json(request)).await.unwrap_err();
    assert!(matches!(err.0, EngineError::Auth(fx_engine::errors::AuthError::Unauthorized)));
    assert_eq!(chain.submission_count(), 0);
}

#[tokio::test]
async fn wallet_signed_order_lifecycle() {
    let (state, _chain, _clock) = build_state(&[]);
    let wallet = LocalWallet::new(&mut rand::thread_rng());

    let fields = [
        ("pair", "EURC/USDC".to_string()),
        ("side", "buy".to_string()),
        ("amount", "1000".to_string()),
        ("limit_rate", "1.08".to_string()),
    ];
    let message = canonical_message("create order", wallet.address(), &fields, "n-1", T0);
    let signature = wallet.sign_message(message).await.unwrap();

    let request = CreateOrderRequest {
        creator: wallet.address(),
        pair: "EURC/USDC".to_string(),
        side: OrderSide::Buy,
        amount: "1000".to_string(),
        limit_rate: 1.08,
        auth: AuthPayload::WalletSigned {
            signer: wallet.address(),
            signature: signature.to_string(),
            nonce: "n-1".to_string(),
            timestamp: T0,
        },
    };

    let created =
        handlers::create_order(State(state.clone()), Json(request)).await.unwrap();
    assert_eq!(created.0["order"]["status"], "open");

    // the trusted agent cannot create orders; they are wallet-signed only
    let agent_request = CreateOrderRequest {
        creator: wallet.address(),
        pair: "EURC/USDC".to_string(),
        side: OrderSide::Buy,
        amount: "1000".to_string(),
        limit_rate: 1.08,
        auth: agent_auth(),
    };
    let err = handlers::create_order(State(state), Json(agent_request)).await.unwrap_err();
    assert!(matches!(err.0, EngineError::Auth(fx_engine::errors::AuthError::Unauthorized)));
}
