//! # Chain Client
//!
//! A rate-limited, fallback-aware interface to an EVM-compatible chain. This
//! module's sole responsibility is low-level chain access: contract reads,
//! transaction submission, receipt waits. It knows nothing about quotes,
//! spreads, or vault accounting; those live behind it.
//!
//! Every outbound call passes a governor rate limiter plus a concurrency
//! semaphore, runs under a per-call timeout, and retries with exponential
//! backoff and jitter before falling through to the next configured endpoint.

use async_trait::async_trait;
use ethers::{
    abi::Token,
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::{Address, Bytes, TransactionRequest, H256, U256},
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rand::Rng;
use std::fmt::Debug;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, instrument, warn};

use crate::config::ChainSettings;
use crate::errors::ChainError;
use crate::types::ReceiptSummary;

/// Narrow chain-access contract the pipeline is written against. Production
/// uses [`RpcChainClient`]; tests substitute scripted mocks.
#[async_trait]
pub trait ChainClient: Send + Sync + Debug {
    /// `eth_call` against `address` with calldata built from the function
    /// signature and ABI-encoded args. Returns the raw return data.
    async fn read_contract_value(
        &self,
        address: Address,
        function_signature: &str,
        args: &[Token],
    ) -> Result<Bytes, ChainError>;

    /// Signs and submits a transaction from the executor wallet. `fee_asset`
    /// selects a non-native fee token on chains that support one; `None`
    /// pays fees in the native asset.
    async fn submit_transaction(
        &self,
        to: Address,
        data: Bytes,
        fee_asset: Option<Address>,
    ) -> Result<H256, ChainError>;

    /// Polls until the receipt is available or the wait budget is exhausted.
    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<ReceiptSummary, ChainError>;

    /// The `from` address of a mined transaction.
    async fn transaction_sender(&self, tx_hash: H256) -> Result<Address, ChainError>;

    /// The executor wallet address transactions are signed with.
    fn executor_address(&self) -> Address;
}

/// Builds calldata from a function signature and ABI-encoded args.
pub fn encode_call(function_signature: &str, args: &[Token]) -> Bytes {
    let selector = &ethers::utils::id(function_signature)[0..4];
    let mut calldata = selector.to_vec();
    calldata.extend_from_slice(&ethers::abi::encode(args));
    Bytes::from(calldata)
}

/// Decodes a single ABI-encoded unsigned integer return value.
pub fn decode_single_uint(data: &Bytes) -> Result<U256, ChainError> {
    if data.len() < 32 {
        return Err(ChainError::DataEncoding(format!(
            "expected 32-byte uint return, got {} bytes",
            data.len()
        )));
    }
    Ok(U256::from_big_endian(&data[..32]))
}

/// Production [`ChainClient`] over JSON-RPC with endpoint fallback.
pub struct RpcChainClient {
    endpoints: Vec<Arc<Provider<Http>>>,
    wallet: LocalWallet,
    settings: ChainSettings,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    concurrency: Arc<Semaphore>,
}

impl Debug for RpcChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChainClient")
            .field("endpoints", &self.endpoints.len())
            .field("executor", &self.wallet.address())
            .finish()
    }
}

impl RpcChainClient {
    pub fn new(settings: ChainSettings, executor_key: &str) -> Result<Self, ChainError> {
        if settings.rpc_urls.is_empty() {
            return Err(ChainError::Config("no RPC endpoints configured".into()));
        }
        let endpoints = settings
            .rpc_urls
            .iter()
            .map(|url| {
                Provider::<Http>::try_from(url.as_str())
                    .map(Arc::new)
                    .map_err(|e| ChainError::Config(format!("bad RPC url {url}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let wallet = executor_key
            .parse::<LocalWallet>()
            .map_err(|e| ChainError::Config(format!("bad executor key: {e}")))?
            .with_chain_id(settings.chain_id);

        let quota = Quota::per_second(
            NonZeroU32::new(settings.rps_limit.max(1)).unwrap_or(NonZeroU32::new(1).unwrap()),
        );
        let concurrency = Arc::new(Semaphore::new(settings.max_concurrent_requests.max(1)));

        Ok(Self {
            endpoints,
            wallet,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            concurrency,
            settings,
        })
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.settings.retry_initial_backoff_ms as f64
            * self.settings.retry_backoff_multiplier.powi(attempt as i32);
        let jitter = rand::thread_rng().gen_range(0.0..=self.settings.retry_jitter_factor);
        Duration::from_millis((base * (1.0 + jitter)) as u64)
    }

    /// Runs `op` against each endpoint in order, with bounded retries per
    /// endpoint, returning the first success.
    async fn with_fallback<T, F, Fut>(&self, label: &str, op: F) -> Result<T, ChainError>
    where
        F: Fn(Arc<Provider<Http>>) -> Fut,
        Fut: std::future::Future<Output = Result<T, ChainError>>,
    {
        let mut last_error = ChainError::Provider("no endpoints tried".into());

        for (idx, endpoint) in self.endpoints.iter().enumerate() {
            for attempt in 0..=self.settings.max_retries {
                let _permit = self
                    .concurrency
                    .acquire()
                    .await
                    .map_err(|_| ChainError::Provider("concurrency semaphore closed".into()))?;
                self.rate_limiter.until_ready().await;

                match timeout(self.settings.call_timeout(), op(endpoint.clone())).await {
                    Ok(Ok(value)) => return Ok(value),
                    Ok(Err(e)) => {
                        debug!(target: "chain", label, endpoint = idx, attempt, error = %e, "RPC call failed");
                        last_error = e;
                    }
                    Err(_) => {
                        debug!(target: "chain", label, endpoint = idx, attempt, "RPC call timed out");
                        last_error = ChainError::Timeout(format!(
                            "{label} timed out after {}ms",
                            self.settings.call_timeout_ms
                        ));
                    }
                }

                if attempt < self.settings.max_retries {
                    sleep(self.backoff_delay(attempt)).await;
                }
            }
            warn!(target: "chain", label, endpoint = idx, "endpoint exhausted, falling through");
        }

        Err(ChainError::AllEndpointsFailed(last_error.to_string()))
    }

}

#[async_trait]
impl ChainClient for RpcChainClient {
    #[instrument(skip(self, args), fields(address = %address, function_signature))]
    async fn read_contract_value(
        &self,
        address: Address,
        function_signature: &str,
        args: &[Token],
    ) -> Result<Bytes, ChainError> {
        let calldata = encode_call(function_signature, args);
        self.with_fallback("read_contract_value", move |provider| {
            let tx = TransactionRequest::new().to(address).data(calldata.clone());
            async move {
                provider
                    .call(&tx.into(), None)
                    .await
                    .map_err(|e| ChainError::Provider(e.to_string()))
            }
        })
        .await
    }

    #[instrument(skip(self, data), fields(to = %to))]
    async fn submit_transaction(
        &self,
        to: Address,
        data: Bytes,
        _fee_asset: Option<Address>,
    ) -> Result<H256, ChainError> {
        let wallet = self.wallet.clone();
        self.with_fallback("submit_transaction", move |provider| {
            let tx = TransactionRequest::new().to(to).data(data.clone()).from(wallet.address());
            let client = SignerMiddleware::new(provider, wallet.clone());
            async move {
                let pending = client
                    .send_transaction(tx, None)
                    .await
                    .map_err(|e| ChainError::Provider(e.to_string()))?;
                Ok(pending.tx_hash())
            }
        })
        .await
    }

    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<ReceiptSummary, ChainError> {
        let budget = Duration::from_millis(self.settings.receipt_wait_budget_ms);
        let poll = Duration::from_millis(self.settings.receipt_poll_ms.max(100));
        let deadline = tokio::time::Instant::now() + budget;

        loop {
            let receipt = self
                .with_fallback("get_transaction_receipt", move |provider| async move {
                    provider
                        .get_transaction_receipt(tx_hash)
                        .await
                        .map_err(|e| ChainError::Provider(e.to_string()))
                })
                .await?;

            if let Some(receipt) = receipt {
                let success = receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false);
                return Ok(ReceiptSummary {
                    tx_hash,
                    success,
                    block_number: receipt.block_number.map(|n| n.as_u64()),
                    logs: receipt.logs,
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ChainError::ReceiptTimeout(tx_hash));
            }
            sleep(poll).await;
        }
    }

    async fn transaction_sender(&self, tx_hash: H256) -> Result<Address, ChainError> {
        let tx = self
            .with_fallback("get_transaction", move |provider| async move {
                provider
                    .get_transaction(tx_hash)
                    .await
                    .map_err(|e| ChainError::Provider(e.to_string()))
            })
            .await?;
        tx.map(|t| t.from).ok_or(ChainError::TransactionNotFound(tx_hash))
    }

    fn executor_address(&self) -> Address {
        self.wallet.address()
    }
}
