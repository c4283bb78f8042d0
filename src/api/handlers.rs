//! Action endpoint handlers. Each mutating handler runs the same pipeline:
//! authenticate (consuming the nonce on the wallet path), short-circuit on a
//! cached idempotent response, do the work, cache the response, answer.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use ethers::types::{Address, H256, U256};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use uuid::Uuid;

use super::{responses::ApiError, ApiState};
use crate::errors::EngineError;
use crate::idempotency::IdempotencyCache;
use crate::types::{AuthPayload, OrderSide, SpreadOpportunity};
use crate::vault::usd_to_units;

const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

//================================================================================================//
//                                         HELPERS                                                //
//================================================================================================//

fn parse_amount(raw: &str) -> Result<U256, EngineError> {
    let amount = U256::from_dec_str(raw)
        .map_err(|_| EngineError::Validation(format!("amount is not a valid integer: {raw}")))?;
    if amount.is_zero() {
        return Err(EngineError::Validation("amount must be positive".into()));
    }
    Ok(amount)
}

fn parse_usd(raw: &str) -> Result<Decimal, EngineError> {
    Decimal::from_str(raw)
        .map_err(|_| EngineError::Validation(format!("amount is not a valid decimal: {raw}")))
}

/// Signer and nonce of a wallet-signed payload, for idempotency-key
/// fallback derivation.
fn wallet_parts(auth: &AuthPayload) -> (Option<Address>, Option<&str>) {
    match auth {
        AuthPayload::WalletSigned { signer, nonce, .. } => (Some(*signer), Some(nonce.as_str())),
        AuthPayload::TrustedAgent { .. } => (None, None),
    }
}

fn idempotency_key(
    scope: &str,
    headers: &HeaderMap,
    body_token: Option<&str>,
    auth: &AuthPayload,
) -> Option<String> {
    let header_token = headers.get(IDEMPOTENCY_HEADER).and_then(|v| v.to_str().ok());
    let explicit = body_token.or(header_token);
    let (signer, nonce) = wallet_parts(auth);
    IdempotencyCache::derive_key(scope, explicit, signer, nonce)
}

fn stamp(mut payload: Value, idempotent: bool) -> Value {
    if let Some(map) = payload.as_object_mut() {
        map.insert("idempotent".into(), json!(idempotent));
    }
    payload
}

/// Rebuilds a response from a cached entry, marking it `idempotent: true`.
/// Cached entries are either a success payload or an error envelope with its
/// original status code; both replay exactly as first served.
async fn cached_response(
    state: &ApiState,
    key: Option<&str>,
) -> Result<Option<Response>, ApiError> {
    let Some(key) = key else { return Ok(None) };
    let Some(payload) = state.idempotency.get(key).await? else { return Ok(None) };

    if let Some(envelope) = payload.get("__error") {
        let status = envelope
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| StatusCode::from_u16(s as u16).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = stamp(envelope.get("body").cloned().unwrap_or(Value::Null), true);
        return Ok(Some((status, Json(body)).into_response()));
    }
    Ok(Some(Json(stamp(payload, true)).into_response()))
}

/// Caches the fresh success payload and stamps it `idempotent: false`.
async fn fresh_response(
    state: &ApiState,
    key: Option<&str>,
    payload: Value,
) -> Result<Response, ApiError> {
    if let Some(key) = key {
        state.idempotency.put(key, payload.clone()).await?;
    }
    Ok(Json(stamp(payload, false)).into_response())
}

/// Caches a terminal execution failure under the idempotency key, so a
/// same-key replay returns this failure instead of re-running a sequence
/// that may have already moved funds. The original status and body replay
/// unchanged.
async fn failed_response(
    state: &ApiState,
    key: Option<&str>,
    error: EngineError,
) -> Result<Response, ApiError> {
    let (status, body) = super::responses::classify(error);
    let body = serde_json::to_value(&body).unwrap_or(Value::Null);
    if let Some(key) = key {
        let envelope = json!({ "__error": { "status": status.as_u16(), "body": body } });
        state.idempotency.put(key, envelope).await?;
    }
    Ok((status, Json(stamp(body, false))).into_response())
}

fn opt_hash(h: &Option<H256>) -> Value {
    match h {
        Some(h) => json!(format!("{h:?}")),
        None => Value::Null,
    }
}

//================================================================================================//
//                                        ARBITRAGE                                               //
//================================================================================================//

#[derive(Debug, Deserialize)]
pub struct ArbitrageRequest {
    pub pair: String,
    pub from_token: Address,
    pub to_token: Address,
    /// Input amount in base units of `from_token`.
    pub amount: String,
    pub buy_venue: Option<String>,
    pub sell_venue: Option<String>,
    pub idempotency_key: Option<String>,
    pub auth: AuthPayload,
}

pub async fn execute_arbitrage(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<ArbitrageRequest>,
) -> Result<Response, ApiError> {
    let amount = parse_amount(&req.amount)?;
    let business_fields = [
        ("pair", req.pair.clone()),
        ("amount", req.amount.clone()),
    ];
    state.authenticator.authorize("arbitrage", "arbitrage", &business_fields, &req.auth).await?;

    let key = idempotency_key("arbitrage", &headers, req.idempotency_key.as_deref(), &req.auth);
    if let Some(cached) = cached_response(&state, key.as_deref()).await? {
        return Ok(cached);
    }

    let (base_currency, _) = req
        .pair
        .split_once('/')
        .ok_or_else(|| EngineError::Validation("pair must be BASE/QUOTE".into()))?;

    let round =
        state.quotes.fetch_round(&req.pair, req.from_token, req.to_token, amount).await?;
    // input amounts are denominated in the pair's base currency; the forex
    // reference feed carries them into USD for the profitability floors
    let fx = state.forex_feed.rate(base_currency, "USD").await;
    let notional_usd =
        units_to_f64(amount, state.config.vault.settlement_token_decimals) * fx.rate;
    let mut opportunity = state.quotes.best_opportunity(&round, notional_usd).await?;
    pin_requested_venues(&mut opportunity, &round, req.buy_venue, req.sell_venue)?;

    let buy_router = state
        .quotes
        .venue_router(&opportunity.buy_venue)
        .ok_or_else(|| EngineError::Validation(format!("unknown venue: {}", opportunity.buy_venue)))?;
    let sell_router = state
        .quotes
        .venue_router(&opportunity.sell_venue)
        .ok_or_else(|| EngineError::Validation(format!("unknown venue: {}", opportunity.sell_venue)))?;

    let trade = match state
        .orchestrator
        .execute_arbitrage(
            &req.pair,
            req.from_token,
            req.to_token,
            amount,
            notional_usd,
            &opportunity,
            buy_router,
            sell_router,
            9_950,
        )
        .await
    {
        Ok(trade) => trade,
        // terminal failures are cached too: a same-key replay must see this
        // outcome, never re-run a sequence that may have moved funds
        Err(e) => return failed_response(&state, key.as_deref(), e.into()).await,
    };

    if let Some(pnl) = trade.pnl_usd {
        if let Ok(pnl) = Decimal::try_from(pnl) {
            state.vault.record_pnl(pnl).await;
        }
    }

    let payload = json!({
        "trade_id": trade.id,
        "pair": trade.pair,
        "buy_venue": opportunity.buy_venue,
        "sell_venue": opportunity.sell_venue,
        "venue_spread_pct": opportunity.spread_pct,
        "expected_pnl_pct": opportunity.spread_pct - opportunity.threshold_pct,
        "approval_tx_hash": opt_hash(&trade.approval_tx_hash),
        "swap_tx_hash": opt_hash(&trade.swap_tx_hash),
        "sell_tx_hash": opt_hash(&trade.transfer_tx_hash),
        "status": trade.status,
    });
    state.notifier.notify("arbitrage_executed", payload.clone());
    fresh_response(&state, key.as_deref(), payload).await
}

/// Replaces the computed venues with explicitly requested ones, when given.
fn pin_requested_venues(
    opportunity: &mut SpreadOpportunity,
    round: &crate::types::QuoteRound,
    buy_venue: Option<String>,
    sell_venue: Option<String>,
) -> Result<(), EngineError> {
    let find = |name: &str| {
        round
            .available()
            .into_iter()
            .find(|q| q.venue == name)
            .cloned()
            .ok_or_else(|| EngineError::Validation(format!("venue {name} did not quote")))
    };
    let mut pinned = false;
    if let Some(name) = buy_venue {
        opportunity.buy_quote = find(&name)?;
        opportunity.buy_venue = name;
        pinned = true;
    }
    if let Some(name) = sell_venue {
        opportunity.sell_quote = find(&name)?;
        opportunity.sell_venue = name;
        pinned = true;
    }
    if pinned {
        // the requested pair must clear the same gate the computed one did
        let spread_pct = crate::quotes::QuoteAggregator::spread_pct(
            opportunity.buy_quote.rate,
            opportunity.sell_quote.rate,
        );
        if spread_pct.abs() < opportunity.threshold_pct {
            return Err(crate::errors::QuoteError::NotProfitable {
                spread_pct,
                threshold_pct: opportunity.threshold_pct,
            }
            .into());
        }
        opportunity.spread_pct = spread_pct;
    }
    Ok(())
}

fn units_to_f64(amount: U256, decimals: u8) -> f64 {
    amount.as_u128() as f64 / 10f64.powi(decimals as i32)
}

//================================================================================================//
//                                        REMITTANCE                                              //
//================================================================================================//

#[derive(Debug, Deserialize)]
pub struct RemittanceRequest {
    pub from_token: Address,
    pub to_token: Address,
    /// Input amount in base units of `from_token`.
    pub amount: String,
    pub recipient: Address,
    pub idempotency_key: Option<String>,
    pub auth: AuthPayload,
}

pub async fn execute_remittance(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<RemittanceRequest>,
) -> Result<Response, ApiError> {
    let amount = parse_amount(&req.amount)?;
    if req.recipient == Address::zero() {
        return Err(EngineError::Validation("recipient must not be the zero address".into()).into());
    }
    let business_fields = [
        ("amount", req.amount.clone()),
        ("recipient", format!("{:#x}", req.recipient)),
    ];
    state.authenticator.authorize("remittance", "remittance", &business_fields, &req.auth).await?;

    let key = idempotency_key("remittance", &headers, req.idempotency_key.as_deref(), &req.auth);
    if let Some(cached) = cached_response(&state, key.as_deref()).await? {
        return Ok(cached);
    }

    let pair = format!("{:#x}/{:#x}", req.from_token, req.to_token);
    let round = state.quotes.fetch_round(&pair, req.from_token, req.to_token, amount).await?;
    // remittance needs one live venue, not a spread; take the best rate
    let quote = round
        .available()
        .into_iter()
        .max_by(|a, b| a.rate.total_cmp(&b.rate))
        .cloned()
        .ok_or(crate::errors::QuoteError::AllVenuesFailed)?;
    let router = state
        .quotes
        .venue_router(&quote.venue)
        .ok_or_else(|| EngineError::Validation(format!("unknown venue: {}", quote.venue)))?;

    let trade = match state
        .orchestrator
        .execute_remittance(
            &pair,
            req.from_token,
            req.to_token,
            amount,
            req.recipient,
            &quote.venue,
            router,
            quote.amount_out,
            9_950,
            quote.rate,
        )
        .await
    {
        Ok(trade) => trade,
        Err(e) => return failed_response(&state, key.as_deref(), e.into()).await,
    };

    let payload = json!({
        "trade_id": trade.id,
        "venue": quote.venue,
        "approval_tx_hash": opt_hash(&trade.approval_tx_hash),
        "swap_tx_hash": opt_hash(&trade.swap_tx_hash),
        "transfer_tx_hash": opt_hash(&trade.transfer_tx_hash),
        "amount_delivered": trade.amount_out.map(|a| a.to_string()),
        "status": trade.status,
    });
    state.notifier.notify("remittance_executed", payload.clone());
    fresh_response(&state, key.as_deref(), payload).await
}

//================================================================================================//
//                                           VAULT                                                //
//================================================================================================//

#[derive(Debug, Deserialize)]
pub struct VaultDepositRequest {
    pub depositor: Address,
    /// Deposit size in vault (USD) terms, e.g. "250.50".
    pub amount: String,
    /// Hash of the depositor's settlement-token transfer to custody.
    pub tx_hash: H256,
    pub auth: AuthPayload,
}

pub async fn vault_deposit(
    State(state): State<ApiState>,
    Json(req): Json<VaultDepositRequest>,
) -> Result<Json<Value>, ApiError> {
    let amount_usd = parse_usd(&req.amount)?;
    let business_fields = [
        ("depositor", format!("{:#x}", req.depositor)),
        ("amount", req.amount.clone()),
        ("tx_hash", format!("{:?}", req.tx_hash)),
    ];
    let ctx = state
        .authenticator
        .authorize("vault_deposit", "vault deposit", &business_fields, &req.auth)
        .await?;
    if let Some(signer) = ctx.signer() {
        if signer != req.depositor {
            return Err(crate::errors::AuthError::Unauthorized.into());
        }
    }

    let claimed_units =
        usd_to_units(amount_usd, state.config.vault.settlement_token_decimals)?;
    state.deposit_verifier.verify(req.depositor, claimed_units, req.tx_hash).await?;

    let (record, created) = state.vault.record_deposit(req.depositor, amount_usd, req.tx_hash).await?;
    let payload = json!({
        "deposit": record,
        "idempotent": !created,
    });
    if created {
        state.notifier.notify("vault_deposit_recorded", payload.clone());
    }
    Ok(Json(payload))
}

#[derive(Debug, Deserialize)]
pub struct VaultWithdrawRequest {
    pub deposit_id: Uuid,
    pub depositor: Address,
    pub auth: AuthPayload,
}

pub async fn vault_withdraw(
    State(state): State<ApiState>,
    Json(req): Json<VaultWithdrawRequest>,
) -> Result<Json<Value>, ApiError> {
    let business_fields = [
        ("deposit_id", req.deposit_id.to_string()),
        ("depositor", format!("{:#x}", req.depositor)),
    ];
    let ctx = state
        .authenticator
        .authorize("vault_withdraw", "vault withdraw", &business_fields, &req.auth)
        .await?;
    if let Some(signer) = ctx.signer() {
        if signer != req.depositor {
            return Err(crate::errors::AuthError::Unauthorized.into());
        }
    }

    let record = state.vault.redeem(req.deposit_id, req.depositor).await?;
    let payload = json!({ "deposit": record });
    state.notifier.notify("vault_withdrawal", payload.clone());
    Ok(Json(payload))
}

pub async fn vault_metrics(State(state): State<ApiState>) -> Json<Value> {
    Json(json!(state.vault.metrics().await))
}

//================================================================================================//
//                                           ORDERS                                               //
//================================================================================================//

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub creator: Address,
    pub pair: String,
    pub side: OrderSide,
    pub amount: String,
    pub limit_rate: f64,
    pub auth: AuthPayload,
}

pub async fn create_order(
    State(state): State<ApiState>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<Value>, ApiError> {
    let amount = parse_amount(&req.amount)?;
    let business_fields = [
        ("pair", req.pair.clone()),
        ("side", format!("{:?}", req.side).to_lowercase()),
        ("amount", req.amount.clone()),
        ("limit_rate", req.limit_rate.to_string()),
    ];
    let ctx = state
        .authenticator
        .authorize("order_create", "create order", &business_fields, &req.auth)
        .await?;
    // order endpoints are wallet-signed only, and the signer is the creator
    match ctx.signer() {
        Some(signer) if signer == req.creator => {}
        _ => return Err(crate::errors::AuthError::Unauthorized.into()),
    }

    let order = state.orders.create(req.creator, &req.pair, req.side, amount, req.limit_rate)?;
    Ok(Json(json!({ "order": order })))
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderRequest {
    pub creator: Address,
    pub auth: AuthPayload,
}

pub async fn cancel_order(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CancelOrderRequest>,
) -> Result<Json<Value>, ApiError> {
    let business_fields = [("order_id", id.to_string())];
    let ctx = state
        .authenticator
        .authorize("order_cancel", "cancel order", &business_fields, &req.auth)
        .await?;
    match ctx.signer() {
        Some(signer) if signer == req.creator => {}
        _ => return Err(crate::errors::AuthError::Unauthorized.into()),
    }

    let order = state.orders.cancel(id, req.creator)?;
    Ok(Json(json!({ "order": order })))
}

//================================================================================================//
//                                      REPORTING VIEWS                                           //
//================================================================================================//

pub async fn get_trade(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let trade = state
        .orchestrator
        .get_trade(&id)
        .ok_or_else(|| EngineError::Validation(format!("trade {id} not found")))?;
    Ok(Json(json!({ "trade": trade })))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn prometheus_metrics() -> String {
    crate::metrics::render()
}
