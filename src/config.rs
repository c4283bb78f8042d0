//! # Configuration
//!
//! JSON-file configuration with per-subsystem settings structs and `Default`
//! impls, loaded once at startup into the single `Config` source of truth.
//! Secrets (agent credential, executor key) come from the environment, never
//! from the config file.

use ethers::types::Address;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the trusted-agent shared secret. Absent →
/// the trusted-agent auth path is reported unavailable.
pub const AGENT_SECRET_ENV: &str = "AGENT_API_SECRET";
/// Environment variable holding the executor wallet private key.
pub const EXECUTOR_KEY_ENV: &str = "EXECUTOR_PRIVATE_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub idempotency: IdempotencySettings,
    #[serde(default)]
    pub quotes: QuoteSettings,
    #[serde(default)]
    pub chain: ChainSettings,
    #[serde(default)]
    pub vault: VaultSettings,
    #[serde(default)]
    pub feeds: FeedSettings,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server: ServerSettings::default(),
            auth: AuthSettings::default(),
            idempotency: IdempotencySettings::default(),
            quotes: QuoteSettings::default(),
            chain: ChainSettings::default(),
            vault: VaultSettings::default(),
            feeds: FeedSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from a single JSON file, then apply environment
    /// overrides for secrets.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut cfg: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config JSON: {}", path.as_ref().display()))?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var(AGENT_SECRET_ENV) {
            if !secret.is_empty() {
                self.auth.agent_secret = Some(secret);
            }
        }
        if let Ok(urls) = std::env::var("CHAIN_RPC_URLS") {
            let parsed: Vec<String> =
                urls.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            if !parsed.is_empty() {
                self.chain.rpc_urls = parsed;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub bind_address: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0:8080".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Trusted-agent shared secret. Loaded from the environment; `None`
    /// leaves the agent path unavailable.
    #[serde(skip)]
    pub agent_secret: Option<String>,
    /// Maximum |now - signed timestamp| accepted on the wallet path, seconds.
    pub max_clock_skew_secs: i64,
    /// Minimum accepted length of the agent credential.
    pub min_secret_len: usize,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self { agent_secret: None, max_clock_skew_secs: 300, min_secret_len: 32 }
    }
}

impl AuthSettings {
    pub fn skew_window(&self) -> Duration {
        Duration::from_secs(self.max_clock_skew_secs.max(0) as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencySettings {
    /// How long a cached response stays replayable, seconds.
    pub ttl_secs: u64,
    /// Entry-count ceiling; expired entries are pruned before inserts once
    /// the store grows past it.
    pub max_entries: usize,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self { ttl_secs: 20 * 60, max_entries: 10_000 }
    }
}

impl IdempotencySettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Profitability floors are tuning parameters, not invariants; they live in
/// configuration so operators can adjust them without a deploy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteSettings {
    /// Quote venues, in display order. Empty means quoting is unavailable.
    #[serde(default)]
    pub venues: Vec<VenueEndpoint>,
    /// Per-venue quote timeout, milliseconds. A venue that misses it is
    /// reported absent, never failing the round.
    pub venue_timeout_ms: u64,
    /// Fixed percentage floor below which no spread executes.
    pub base_floor_pct: f64,
    /// Slippage allowance folded into the dynamic threshold.
    pub slippage_buffer_pct: f64,
    /// Extra margin on top of gas + slippage.
    pub safety_margin_pct: f64,
    /// Absolute profit floor in USD.
    pub min_absolute_profit_usd: f64,
    /// Consecutive venue failures before its breaker opens.
    pub breaker_failure_threshold: u32,
    /// Breaker cooldown, seconds.
    pub breaker_cooldown_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueEndpoint {
    pub name: String,
    pub quote_url: String,
    /// Router contract the orchestrator trades through on this venue.
    pub router_address: Address,
}

impl Default for QuoteSettings {
    fn default() -> Self {
        Self {
            venues: Vec::new(),
            venue_timeout_ms: 5_000,
            base_floor_pct: 0.3,
            slippage_buffer_pct: 0.1,
            safety_margin_pct: 0.05,
            min_absolute_profit_usd: 1.0,
            breaker_failure_threshold: 5,
            breaker_cooldown_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    pub chain_id: u64,
    /// Ordered fallback list; the client walks it on failure.
    pub rpc_urls: Vec<String>,
    /// Per-call timeout, milliseconds.
    pub call_timeout_ms: u64,
    /// Retries per endpoint before falling through to the next.
    pub max_retries: u32,
    pub retry_initial_backoff_ms: u64,
    pub retry_backoff_multiplier: f64,
    pub retry_jitter_factor: f64,
    /// Outbound requests per second across all endpoints.
    pub rps_limit: u32,
    /// Maximum in-flight RPC calls.
    pub max_concurrent_requests: usize,
    /// Receipt polling interval, milliseconds.
    pub receipt_poll_ms: u64,
    /// Total receipt wait budget, milliseconds.
    pub receipt_wait_budget_ms: u64,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            chain_id: 1,
            rpc_urls: vec!["http://127.0.0.1:8545".to_string()],
            call_timeout_ms: 10_000,
            max_retries: 3,
            retry_initial_backoff_ms: 100,
            retry_backoff_multiplier: 2.0,
            retry_jitter_factor: 0.1,
            rps_limit: 20,
            max_concurrent_requests: 16,
            receipt_poll_ms: 1_500,
            receipt_wait_budget_ms: 120_000,
        }
    }
}

impl ChainSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSettings {
    /// Address pooled capital is custodied at; deposit proofs must transfer
    /// to it.
    pub custody_address: Address,
    /// Settlement token the vault is denominated in.
    pub settlement_token: Address,
    pub settlement_token_decimals: u8,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            custody_address: Address::zero(),
            settlement_token: Address::zero(),
            settlement_token_decimals: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSettings {
    pub forex_feed_url: String,
    pub crypto_feed_url: String,
    pub request_timeout_ms: u64,
    /// Last-known fallback used when the forex feed is unreachable.
    pub forex_fallback_rate: f64,
    /// Last-known fallback used when the crypto feed is unreachable.
    pub crypto_fallback_rate: f64,
    /// Optional webhook notified (best-effort) on completed executions.
    pub notification_webhook: Option<String>,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            forex_feed_url: "https://api.exchangerate.host/latest".to_string(),
            crypto_feed_url: "https://api.coingecko.com/api/v3/simple/price".to_string(),
            request_timeout_ms: 5_000,
            forex_fallback_rate: 1.08,
            crypto_fallback_rate: 1.0,
            notification_webhook: None,
        }
    }
}
