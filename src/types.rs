//! # Core Domain Types
//!
//! Records and enums shared across the execution pipeline. Records owned by a
//! single component (the orchestrator owns trade records, the vault owns
//! deposit records) are mutated only by their owner; everything else reads.

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//================================================================================================//
//                                        AUTHENTICATION                                          //
//================================================================================================//

/// How a caller proved who they are. The two paths are mutually exclusive and
/// selected by the request's explicit `mode` discriminator, never inferred
/// from which fields happen to be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    TrustedAgent,
    WalletSigned,
}

/// Caller-supplied authentication material.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthPayload {
    /// Bearer-style shared secret held by the autonomous agent.
    TrustedAgent { token: String },
    /// Wallet signature over the canonical action message.
    WalletSigned {
        signer: Address,
        signature: String,
        nonce: String,
        /// Unix seconds at signing time; bounded by the server's clock-skew
        /// window.
        timestamp: i64,
    },
}

/// Resolved caller identity after a successful authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerIdentity {
    Agent,
    Wallet(Address),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub mode: AuthMode,
    pub identity: CallerIdentity,
}

impl AuthContext {
    /// The wallet behind this authorization, if the wallet path was used.
    pub fn signer(&self) -> Option<Address> {
        match self.identity {
            CallerIdentity::Wallet(addr) => Some(addr),
            CallerIdentity::Agent => None,
        }
    }
}

//================================================================================================//
//                                        TRADE RECORDS                                           //
//================================================================================================//

/// Lifecycle of a trade or transfer. `Pending` is pre-submission only; a
/// record reaches exactly one terminal state and never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TradeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeStatus::Confirmed | TradeStatus::Failed)
    }
}

/// One trade (arbitrage) or transfer (remittance) execution, written
/// exclusively by the orchestrator that created it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub pair: String,
    pub from_token: Address,
    pub to_token: Address,
    pub amount_in: U256,
    pub amount_out: Option<U256>,
    pub rate: f64,
    pub spread_pct: f64,
    pub buy_venue: Option<String>,
    pub sell_venue: Option<String>,
    pub status: TradeStatus,
    pub approval_tx_hash: Option<H256>,
    pub swap_tx_hash: Option<H256>,
    pub transfer_tx_hash: Option<H256>,
    pub pnl_usd: Option<f64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one fully-executed leg: the approval and the operation that
/// spent it. Preserved on partial failure so operators can reconcile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegExecutionResult {
    pub leg_index: usize,
    pub venue: String,
    pub approval_tx_hash: Option<H256>,
    pub swap_tx_hash: Option<H256>,
    pub amount_out: U256,
}

//================================================================================================//
//                                       VAULT RECORDS                                            //
//================================================================================================//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Active,
    Withdrawn,
}

/// A verified pooled-capital deposit. Created only after the on-chain
/// transfer has been proven; the entry share price is frozen at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRecord {
    pub id: Uuid,
    pub depositor: Address,
    pub amount_usd: Decimal,
    pub shares_issued: Decimal,
    pub share_price_at_entry: Decimal,
    pub tx_hash: H256,
    pub status: DepositStatus,
    pub withdraw_tx_hash: Option<H256>,
    pub created_at: DateTime<Utc>,
}

/// Derived vault figures. Never stored; recomputed from the ledgers.
#[derive(Debug, Clone, Serialize)]
pub struct VaultMetrics {
    pub total_value_locked: Decimal,
    pub total_shares: Decimal,
    pub share_price: Decimal,
    pub cumulative_pnl: Decimal,
    pub active_deposits: usize,
}

//================================================================================================//
//                                       ORDER RECORDS                                            //
//================================================================================================//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: Uuid,
    pub creator: Address,
    pub pair: String,
    pub side: OrderSide,
    pub amount: U256,
    pub limit_rate: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

//================================================================================================//
//                                           QUOTES                                               //
//================================================================================================//

/// A single venue's answer for a pair and notional. `rate` is output units
/// per input unit; `gas_estimate` feeds the dynamic profitability threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VenueQuote {
    pub venue: String,
    pub rate: f64,
    pub amount_out: U256,
    pub gas_estimate: U256,
}

/// Aggregated quote round: one slot per configured venue, `None` where the
/// venue failed, timed out, or its breaker is open.
#[derive(Debug, Clone, Serialize)]
pub struct QuoteRound {
    pub pair: String,
    pub amount_in: U256,
    pub quotes: Vec<Option<VenueQuote>>,
}

impl QuoteRound {
    pub fn available(&self) -> Vec<&VenueQuote> {
        self.quotes.iter().flatten().collect()
    }
}

/// The best executable opportunity out of a quote round, with the threshold
/// it cleared.
#[derive(Debug, Clone, Serialize)]
pub struct SpreadOpportunity {
    pub buy_venue: String,
    pub sell_venue: String,
    pub spread_pct: f64,
    pub threshold_pct: f64,
    pub buy_quote: VenueQuote,
    pub sell_quote: VenueQuote,
}

//================================================================================================//
//                                        CHAIN SEAM                                              //
//================================================================================================//

/// Minimal receipt view the pipeline needs: success flag plus raw logs for
/// event decoding.
#[derive(Debug, Clone)]
pub struct ReceiptSummary {
    pub tx_hash: H256,
    pub success: bool,
    pub block_number: Option<u64>,
    pub logs: Vec<ethers::types::Log>,
}

/// A price observation from an external feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeedRate {
    pub rate: f64,
    /// Unix seconds of the observation; fallback constants carry 0.
    pub as_of: i64,
}
