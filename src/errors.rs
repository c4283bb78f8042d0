//! # Centralized Error Handling
//!
//! One typed error enum per subsystem, aggregated into [`EngineError`] at the
//! top. Keeping the hierarchy explicit preserves failure context across the
//! execution pipeline and lets the API layer decide exactly what a caller is
//! allowed to learn (auth failures in particular are never elaborated).

use ethers::types::{Address, H256, U256};
use thiserror::Error;
use uuid::Uuid;

use crate::types::LegExecutionResult;

/// Vocabulary that marks a failure as transient infrastructure trouble.
/// Anything matching is safe for the caller to retry under a fresh
/// idempotency key; nothing here implies a chain mutation landed.
const TRANSIENT_ERROR_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "connection",
    "gateway",
    "rate limit",
    "too many requests",
    "429",
    "503",
    "unavailable",
    "reset by peer",
    "temporarily",
];

/// Case-insensitive match of an error message against the transient
/// infrastructure vocabulary.
pub fn is_transient_message(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    TRANSIENT_ERROR_PATTERNS.iter().any(|p| lower.contains(p))
}

/// The top-level error type for the execution engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Quote error: {0}")]
    Quote(#[from] QuoteError),
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("Orchestration error: {0}")]
    Orchestrator(#[from] OrchestratorError),
    #[error("Deposit verification error: {0}")]
    Deposit(#[from] DepositError),
    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("Order error: {0}")]
    Order(#[from] OrderError),
    #[error("Other error: {0}")]
    Other(String),
}

/// Authorization failures. Every caller-facing failure is the single
/// undifferentiated [`AuthError::Unauthorized`]; the precise cause is logged
/// server-side only, so the endpoint cannot be used as an oracle for
/// signature, timestamp, or nonce validity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("unauthorized")]
    Unauthorized,
    /// The trusted-agent path has no server-side secret configured. This is
    /// an operator problem, not a caller problem, and is reported distinctly.
    #[error("trusted-agent authentication is not configured on this server")]
    AgentPathUnavailable,
}

/// Errors from the keyed store backing the nonce ledger and idempotency cache.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("payload serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Errors related to venue quoting and the profitability gate.
#[derive(Error, Debug, Clone)]
pub enum QuoteError {
    #[error("no quote venues configured")]
    NoVenuesConfigured,
    #[error("all quote venues failed or timed out")]
    AllVenuesFailed,
    #[error("need at least two venue quotes to compute a spread, got {0}")]
    InsufficientQuotes(usize),
    #[error(
        "spread {spread_pct:.4}% below execution threshold {threshold_pct:.4}%"
    )]
    NotProfitable { spread_pct: f64, threshold_pct: f64 },
    #[error("quote configuration error: {0}")]
    Config(String),
}

/// Errors related to chain reads/writes through the RPC client.
#[derive(Error, Debug, Clone)]
pub enum ChainError {
    #[error("provider error: {0}")]
    Provider(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("all configured endpoints failed, last error: {0}")]
    AllEndpointsFailed(String),
    #[error("transaction {tx_hash:?} reverted: {reason}")]
    Reverted { tx_hash: H256, reason: String },
    #[error("no receipt for transaction {0:?} within the wait budget")]
    ReceiptTimeout(H256),
    #[error("transaction {0:?} not found")]
    TransactionNotFound(H256),
    #[error("data encoding/decoding error: {0}")]
    DataEncoding(String),
    #[error("chain configuration error: {0}")]
    Config(String),
}

impl ChainError {
    /// Whether the failure is transient infrastructure trouble rather than a
    /// deterministic rejection.
    pub fn is_transient(&self) -> bool {
        match self {
            ChainError::Timeout(_) | ChainError::Network(_) | ChainError::ReceiptTimeout(_) => true,
            ChainError::Provider(msg) | ChainError::AllEndpointsFailed(msg) => {
                is_transient_message(msg)
            }
            _ => false,
        }
    }
}

/// Errors from the multi-leg transaction orchestrator.
#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    #[error("leg {failed_leg} failed before any funds moved: {error}")]
    FailedBeforeExecution { failed_leg: usize, error: String },
    #[error(
        "partial execution: {completed_legs} leg(s) completed, leg {failed_leg} failed: {error}"
    )]
    PartialExecution {
        completed_legs: usize,
        failed_leg: usize,
        error: String,
        completed_results: Vec<LegExecutionResult>,
    },
    #[error("insufficient balance: have {available}, need {required}")]
    InsufficientBalance { required: U256, available: U256 },
    #[error("submission failed: {0}")]
    Submission(String),
    #[error("orchestrator configuration error: {0}")]
    Config(String),
}

impl OrchestratorError {
    pub fn is_transient(&self) -> bool {
        match self {
            // Nothing moved on-chain; a retry under a fresh idempotency key
            // is safe whenever the underlying cause was infrastructure.
            OrchestratorError::FailedBeforeExecution { error, .. } => is_transient_message(error),
            // Funds moved in an earlier leg. Never blind-retry.
            OrchestratorError::PartialExecution { .. } => false,
            OrchestratorError::Submission(msg) => is_transient_message(msg),
            OrchestratorError::InsufficientBalance { .. } | OrchestratorError::Config(_) => false,
        }
    }

    /// An actionable next step for non-retryable failures.
    pub fn next_step(&self) -> String {
        match self {
            OrchestratorError::FailedBeforeExecution { .. } => {
                "no funds moved; correct the underlying error and resubmit with a fresh idempotency key".into()
            }
            OrchestratorError::PartialExecution { completed_results, .. } => {
                let hashes: Vec<String> = completed_results
                    .iter()
                    .filter_map(|r| r.swap_tx_hash.map(|h| format!("{h:?}")))
                    .collect();
                format!(
                    "first leg settled on-chain ({}); reconcile the intermediate balance manually before retrying",
                    hashes.join(", ")
                )
            }
            OrchestratorError::InsufficientBalance { required, .. } => {
                format!("fund the executor wallet with at least {required} of the input token")
            }
            OrchestratorError::Submission(_) => {
                "resubmit with a fresh idempotency key once the RPC endpoint recovers".into()
            }
            OrchestratorError::Config(_) => "fix the server-side orchestrator settings".into(),
        }
    }
}

impl From<ChainError> for OrchestratorError {
    fn from(e: ChainError) -> Self {
        OrchestratorError::Submission(e.to_string())
    }
}

/// Deposit-proof verification failures. Each rejection names its reason so
/// the depositor (or an operator) can tell a bad claim from a not-yet-indexed
/// transaction.
#[derive(Error, Debug, Clone)]
pub enum DepositError {
    /// Receipt not visible yet on the read layer. Retryable: the transaction
    /// may simply not be indexed.
    #[error("transaction {0:?} is not yet confirmed")]
    NotYetConfirmed(H256),
    #[error("transaction {0:?} reverted on-chain")]
    TransactionFailed(H256),
    #[error("transaction sender {actual:?} does not match claimed depositor {claimed:?}")]
    SenderMismatch { claimed: Address, actual: Address },
    #[error("no transfer of exactly {claimed_amount} from depositor to custody found in logs")]
    NoMatchingTransfer { claimed_amount: U256 },
    #[error("chain error during verification: {0}")]
    Chain(#[from] ChainError),
}

impl DepositError {
    pub fn is_transient(&self) -> bool {
        match self {
            DepositError::NotYetConfirmed(_) => true,
            DepositError::Chain(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Errors from vault share accounting and redemption.
#[derive(Error, Debug, Clone)]
pub enum VaultError {
    #[error("deposit {0} not found")]
    DepositNotFound(Uuid),
    #[error("deposit {0} was already withdrawn")]
    AlreadyWithdrawn(Uuid),
    #[error("a redemption of deposit {0} is already in flight")]
    RedemptionInProgress(Uuid),
    #[error("caller is not the depositor of record")]
    NotDepositOwner,
    #[error("insufficient custody balance: have {available}, payout needs {required}")]
    InsufficientCustodyBalance { required: U256, available: U256 },
    #[error("invalid deposit amount: {0}")]
    InvalidAmount(String),
    #[error("chain error during payout: {0}")]
    Chain(#[from] ChainError),
}

/// Errors from the order book endpoints.
#[derive(Error, Debug, Clone)]
pub enum OrderError {
    #[error("order {0} not found")]
    NotFound(Uuid),
    #[error("only the order creator may cancel it")]
    NotCreator,
    #[error("order {0} is already cancelled")]
    AlreadyCancelled(Uuid),
    #[error("invalid order parameters: {0}")]
    Validation(String),
}

impl From<eyre::Report> for EngineError {
    fn from(e: eyre::Report) -> Self {
        EngineError::Other(e.to_string())
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        EngineError::Other(e.to_string())
    }
}
