//! Response envelopes and the caller-facing error taxonomy.
//!
//! The mapping here is the single place deciding what a caller learns from a
//! failure. Authorization failures stay undifferentiated; profitability
//! rejections carry their numbers; transient failures carry `retryable` and
//! a human-readable next step.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::Serialize;

use crate::errors::{
    AuthError, DepositError, EngineError, OrchestratorError, OrderError, QuoteError, StoreError,
    VaultError,
};

/// Structured error body every non-2xx response carries.
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorBody {
    pub error: &'static str,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spread_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_leg_tx_hashes: Option<Vec<String>>,
}

impl ApiErrorBody {
    fn new(error: &'static str, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
            retryable: false,
            next_step: None,
            spread_pct: None,
            threshold_pct: None,
            completed_leg_tx_hashes: None,
        }
    }

    fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    fn next_step(mut self, step: impl Into<String>) -> Self {
        self.next_step = Some(step.into());
        self
    }
}

/// Handler error wrapper so `?` works on any subsystem error.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl<E: Into<EngineError>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = classify(self.0);
        (status, Json(body)).into_response()
    }
}

pub(crate) fn classify(error: EngineError) -> (StatusCode, ApiErrorBody) {
    match error {
        EngineError::Auth(AuthError::Unauthorized) => (
            StatusCode::UNAUTHORIZED,
            // deliberately content-free: the auth path is not an oracle
            ApiErrorBody::new("unauthorized", "unauthorized"),
        ),
        EngineError::Auth(AuthError::AgentPathUnavailable) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiErrorBody::new(
                "configuration_error",
                "trusted-agent authentication is not configured on this server",
            )
            .next_step("configure the agent secret server-side; do not retry"),
        ),
        EngineError::Validation(msg) => {
            (StatusCode::BAD_REQUEST, ApiErrorBody::new("validation_error", msg))
        }
        EngineError::Config(msg) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiErrorBody::new("configuration_error", msg)
                .next_step("server-side configuration problem; do not retry"),
        ),
        EngineError::Quote(QuoteError::NotProfitable { spread_pct, threshold_pct }) => {
            let mut body = ApiErrorBody::new(
                "not_profitable",
                format!("spread {spread_pct:.4}% is below the execution threshold {threshold_pct:.4}%"),
            );
            body.spread_pct = Some(spread_pct);
            body.threshold_pct = Some(threshold_pct);
            (StatusCode::UNPROCESSABLE_ENTITY, body)
        }
        EngineError::Quote(e @ (QuoteError::AllVenuesFailed | QuoteError::InsufficientQuotes(_))) => (
            StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorBody::new("transient_infrastructure", e.to_string())
                .retryable(true)
                .next_step("venues are unreachable; retry shortly with a fresh idempotency key"),
        ),
        EngineError::Quote(e) => {
            (StatusCode::INTERNAL_SERVER_ERROR, ApiErrorBody::new("configuration_error", e.to_string()))
        }
        EngineError::Orchestrator(e) => classify_orchestrator(e),
        EngineError::Deposit(e) => classify_deposit(e),
        EngineError::Vault(e) => classify_vault(e),
        EngineError::Order(e) => classify_order(e),
        EngineError::Chain(e) => {
            let retryable = e.is_transient();
            (
                StatusCode::BAD_GATEWAY,
                ApiErrorBody::new(
                    if retryable { "transient_infrastructure" } else { "execution_failed" },
                    e.to_string(),
                )
                .retryable(retryable),
            )
        }
        EngineError::Store(StoreError::Backend(msg) | StoreError::Serialization(msg)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiErrorBody::new("transient_infrastructure", msg).retryable(true),
        ),
        EngineError::Other(msg) => {
            (StatusCode::INTERNAL_SERVER_ERROR, ApiErrorBody::new("internal_error", msg))
        }
    }
}

fn classify_orchestrator(e: OrchestratorError) -> (StatusCode, ApiErrorBody) {
    let retryable = e.is_transient();
    let next_step = e.next_step();
    match e {
        OrchestratorError::PartialExecution { ref completed_results, .. } => {
            let hashes = completed_results
                .iter()
                .flat_map(|r| [r.approval_tx_hash, r.swap_tx_hash])
                .flatten()
                .map(|h| format!("{h:?}"))
                .collect();
            let mut body = ApiErrorBody::new("partial_execution_failure", e.to_string())
                .retryable(false)
                .next_step(next_step);
            body.completed_leg_tx_hashes = Some(hashes);
            (StatusCode::BAD_GATEWAY, body)
        }
        OrchestratorError::InsufficientBalance { .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            ApiErrorBody::new("validation_error", e.to_string()).next_step(next_step),
        ),
        OrchestratorError::Config(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiErrorBody::new("configuration_error", e.to_string()).next_step(next_step),
        ),
        _ => (
            StatusCode::BAD_GATEWAY,
            ApiErrorBody::new(
                if retryable { "transient_infrastructure" } else { "execution_failed" },
                e.to_string(),
            )
            .retryable(retryable)
            .next_step(next_step),
        ),
    }
}

fn classify_deposit(e: DepositError) -> (StatusCode, ApiErrorBody) {
    let retryable = e.is_transient();
    let body = ApiErrorBody::new("verification_failed", e.to_string()).retryable(retryable);
    let body = if retryable {
        body.next_step("the transaction may not be indexed yet; retry in a few seconds")
    } else {
        body
    };
    let status = if retryable { StatusCode::CONFLICT } else { StatusCode::UNPROCESSABLE_ENTITY };
    (status, body)
}

fn classify_vault(e: VaultError) -> (StatusCode, ApiErrorBody) {
    match e {
        VaultError::DepositNotFound(_) => {
            (StatusCode::NOT_FOUND, ApiErrorBody::new("validation_error", e.to_string()))
        }
        VaultError::NotDepositOwner => {
            (StatusCode::FORBIDDEN, ApiErrorBody::new("unauthorized", "unauthorized"))
        }
        VaultError::AlreadyWithdrawn(_) | VaultError::InvalidAmount(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, ApiErrorBody::new("validation_error", e.to_string()))
        }
        VaultError::RedemptionInProgress(_) => {
            (StatusCode::CONFLICT, ApiErrorBody::new("validation_error", e.to_string()).retryable(true))
        }
        VaultError::InsufficientCustodyBalance { .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            ApiErrorBody::new("execution_failed", e.to_string())
                .next_step("custody is underfunded; contact the operator before retrying"),
        ),
        VaultError::Chain(chain) => {
            let retryable = chain.is_transient();
            (
                StatusCode::BAD_GATEWAY,
                ApiErrorBody::new(
                    if retryable { "transient_infrastructure" } else { "execution_failed" },
                    chain.to_string(),
                )
                .retryable(retryable),
            )
        }
    }
}

fn classify_order(e: OrderError) -> (StatusCode, ApiErrorBody) {
    match e {
        OrderError::NotFound(_) => {
            (StatusCode::NOT_FOUND, ApiErrorBody::new("validation_error", e.to_string()))
        }
        OrderError::NotCreator => {
            (StatusCode::FORBIDDEN, ApiErrorBody::new("unauthorized", "unauthorized"))
        }
        OrderError::AlreadyCancelled(_) | OrderError::Validation(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, ApiErrorBody::new("validation_error", e.to_string()))
        }
    }
}
