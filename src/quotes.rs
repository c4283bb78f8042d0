//! # Quote Aggregation & Profitability Gate
//!
//! Fetches comparable quotes from every configured venue in parallel, each
//! under its own timeout, and computes the pairwise spread between the
//! surviving quotes. A venue that fails, times out, or has its circuit
//! breaker open is reported absent (`None`) and excluded from spread math;
//! it never fails the round. The execution threshold is dynamic: a fixed
//! floor, a gas-derived component, and an absolute-profit floor, combined
//! with `max` so no individual floor can be undercut.

use async_trait::async_trait;
use ethers::types::{Address, U256};
use futures::future::join_all;
use moka::future::Cache;
use reqwest::Client;
use serde::Deserialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::config::{QuoteSettings, VenueEndpoint};
use crate::errors::QuoteError;
use crate::metrics::QUOTE_LATENCY;
use crate::price_feeds::PriceFeed;
use crate::types::{QuoteRound, SpreadOpportunity, VenueQuote};

/// How long a fetched quote stays servable from cache.
const QUOTE_CACHE_TTL: Duration = Duration::from_secs(5);

//================================================================================================//
//                                      VENUE SEAM                                                //
//================================================================================================//

/// A single venue's quoting interface. `rate` is quote-token units per
/// base-token unit for the requested conversion.
#[async_trait]
pub trait VenueQuoteSource: Send + Sync + Debug {
    async fn quote(
        &self,
        pair: &str,
        from_token: Address,
        to_token: Address,
        amount_in: U256,
    ) -> Result<VenueQuote, QuoteError>;

    fn name(&self) -> &str;

    /// Router contract executions on this venue go through.
    fn router_address(&self) -> Address;
}

#[derive(Debug, Clone, Deserialize)]
struct HttpQuoteReply {
    rate: f64,
    #[serde(rename = "amountOut")]
    amount_out: String,
    #[serde(rename = "estimatedGas")]
    estimated_gas: Option<u64>,
}

/// Venue backed by an external aggregator HTTP API.
#[derive(Debug, Clone)]
pub struct HttpVenueQuoteSource {
    name: String,
    quote_url: String,
    router_address: Address,
    client: Client,
}

impl HttpVenueQuoteSource {
    pub fn new(endpoint: &VenueEndpoint, request_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent("fx-engine/0.3")
            .build()
            .unwrap_or_default();
        Self {
            name: endpoint.name.clone(),
            quote_url: endpoint.quote_url.clone(),
            router_address: endpoint.router_address,
            client,
        }
    }
}

#[async_trait]
impl VenueQuoteSource for HttpVenueQuoteSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn router_address(&self) -> Address {
        self.router_address
    }

    async fn quote(
        &self,
        pair: &str,
        from_token: Address,
        to_token: Address,
        amount_in: U256,
    ) -> Result<VenueQuote, QuoteError> {
        let url = format!(
            "{}?pair={}&fromToken={:#x}&toToken={:#x}&amount={}",
            self.quote_url, pair, from_token, to_token, amount_in
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| QuoteError::Config(format!("{} request failed: {e}", self.name)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| QuoteError::Config(format!("{} body read failed: {e}", self.name)))?;
        if !status.is_success() {
            return Err(QuoteError::Config(format!("{} API error {status}: {text}", self.name)));
        }
        let reply: HttpQuoteReply = serde_json::from_str(&text)
            .map_err(|e| QuoteError::Config(format!("{} JSON error: {e}", self.name)))?;
        let amount_out = U256::from_dec_str(&reply.amount_out)
            .map_err(|e| QuoteError::Config(format!("{} bad amountOut: {e}", self.name)))?;

        Ok(VenueQuote {
            venue: self.name.clone(),
            rate: reply.rate,
            amount_out,
            gas_estimate: reply.estimated_gas.unwrap_or(200_000).into(),
        })
    }
}

//================================================================================================//
//                                     CIRCUIT BREAKER                                            //
//================================================================================================//

#[derive(Debug)]
struct BreakerState {
    failure_count: u32,
    open_until: Option<Instant>,
}

/// Per-venue breaker: consecutive failures open it for a cooldown, after
/// which it half-opens with a reduced failure budget.
#[derive(Debug)]
struct VenueBreaker {
    state: RwLock<BreakerState>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl VenueBreaker {
    fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: RwLock::new(BreakerState { failure_count: 0, open_until: None }),
            failure_threshold,
            cooldown,
        }
    }

    async fn is_open(&self) -> bool {
        let mut state = self.state.write().await;
        if let Some(open_until) = state.open_until {
            if Instant::now() < open_until {
                return true;
            }
            state.open_until = None;
            state.failure_count = self.failure_threshold / 2;
        }
        false
    }

    async fn record_success(&self) {
        let mut state = self.state.write().await;
        state.failure_count = 0;
        state.open_until = None;
    }

    async fn record_failure(&self, venue: &str) {
        let mut state = self.state.write().await;
        state.failure_count += 1;
        if state.failure_count >= self.failure_threshold {
            state.open_until = Some(Instant::now() + self.cooldown);
            warn!(target: "quotes", venue, cooldown_secs = self.cooldown.as_secs(), "circuit breaker tripped");
        }
    }
}

//================================================================================================//
//                                       AGGREGATOR                                               //
//================================================================================================//

#[derive(Debug)]
struct VenueState {
    source: Arc<dyn VenueQuoteSource>,
    breaker: VenueBreaker,
}

#[derive(Debug)]
pub struct QuoteAggregator {
    venues: Vec<VenueState>,
    settings: QuoteSettings,
    /// Prices the chain's gas asset in USD for the threshold computation.
    gas_price_feed: Arc<dyn PriceFeed>,
    quote_cache: Cache<(String, String, U256), VenueQuote>,
}

impl QuoteAggregator {
    pub fn new(
        sources: Vec<Arc<dyn VenueQuoteSource>>,
        settings: QuoteSettings,
        gas_price_feed: Arc<dyn PriceFeed>,
    ) -> Self {
        let venues = sources
            .into_iter()
            .map(|source| VenueState {
                breaker: VenueBreaker::new(
                    settings.breaker_failure_threshold,
                    Duration::from_secs(settings.breaker_cooldown_secs),
                ),
                source,
            })
            .collect();
        Self {
            venues,
            settings,
            gas_price_feed,
            quote_cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(QUOTE_CACHE_TTL)
                .build(),
        }
    }

    pub fn venue_router(&self, venue: &str) -> Option<Address> {
        self.venues
            .iter()
            .find(|v| v.source.name() == venue)
            .map(|v| v.source.router_address())
    }

    /// Queries every venue in parallel. One slot per venue, `None` where the
    /// venue failed, timed out, or is breaker-open.
    #[instrument(skip(self), fields(pair, amount_in = %amount_in))]
    pub async fn fetch_round(
        &self,
        pair: &str,
        from_token: Address,
        to_token: Address,
        amount_in: U256,
    ) -> Result<QuoteRound, QuoteError> {
        if self.venues.is_empty() {
            return Err(QuoteError::NoVenuesConfigured);
        }

        let venue_timeout = Duration::from_millis(self.settings.venue_timeout_ms);
        let fetches = self.venues.iter().map(|state| {
            let cache = self.quote_cache.clone();
            let cache_key = (state.source.name().to_string(), pair.to_string(), amount_in);
            async move {
                if state.breaker.is_open().await {
                    debug!(target: "quotes", venue = state.source.name(), "breaker open, reporting absent");
                    return None;
                }
                if let Some(cached) = cache.get(&cache_key).await {
                    return Some(cached);
                }

                let started = Instant::now();
                let result =
                    timeout(venue_timeout, state.source.quote(pair, from_token, to_token, amount_in))
                        .await;
                QUOTE_LATENCY.observe(started.elapsed().as_secs_f64());

                match result {
                    Ok(Ok(quote)) => {
                        state.breaker.record_success().await;
                        cache.insert(cache_key, quote.clone()).await;
                        Some(quote)
                    }
                    Ok(Err(e)) => {
                        warn!(target: "quotes", venue = state.source.name(), error = %e, "venue quote failed");
                        state.breaker.record_failure(state.source.name()).await;
                        None
                    }
                    Err(_) => {
                        warn!(target: "quotes", venue = state.source.name(), "venue quote timed out");
                        state.breaker.record_failure(state.source.name()).await;
                        None
                    }
                }
            }
        });

        let quotes = join_all(fetches).await;
        if quotes.iter().all(Option::is_none) {
            return Err(QuoteError::AllVenuesFailed);
        }

        Ok(QuoteRound { pair: pair.to_string(), amount_in, quotes })
    }

    /// Pairwise spread between two venue rates, percent of the reference.
    pub fn spread_pct(rate_a: f64, rate_b: f64) -> f64 {
        (rate_a - rate_b) / rate_b * 100.0
    }

    /// The dynamic execution threshold: no individual floor can be
    /// undercut, so the binding one wins.
    pub fn execution_threshold_pct(&self, notional_usd: f64, gas_cost_usd: f64) -> f64 {
        let gas_pct = if notional_usd > 0.0 { gas_cost_usd / notional_usd * 100.0 } else { f64::MAX };
        let dynamic =
            gas_pct + self.settings.slippage_buffer_pct + self.settings.safety_margin_pct;
        let absolute_floor = if notional_usd > 0.0 {
            self.settings.min_absolute_profit_usd / notional_usd * 100.0
        } else {
            f64::MAX
        };
        self.settings.base_floor_pct.max(dynamic).max(absolute_floor)
    }

    /// Estimated USD cost of executing both legs of an opportunity.
    async fn estimate_gas_cost_usd(&self, quotes: &[&VenueQuote]) -> f64 {
        let total_gas: U256 =
            quotes.iter().fold(U256::zero(), |acc, q| acc.saturating_add(q.gas_estimate));
        // Flat 30 gwei estimate; venue gas figures dominate the error here.
        let gas_price_wei = 30_000_000_000u64;
        let native_usd = self.gas_price_feed.rate("ethereum", "usd").await.rate;
        let cost_wei = total_gas.saturating_mul(U256::from(gas_price_wei));
        (cost_wei.as_u128() as f64 / 1e18) * native_usd
    }

    /// Picks the widest executable spread out of a round and gates it on the
    /// dynamic threshold. Returns `NotProfitable` (with the numbers) when
    /// the spread does not clear it.
    pub async fn best_opportunity(
        &self,
        round: &QuoteRound,
        notional_usd: f64,
    ) -> Result<SpreadOpportunity, QuoteError> {
        let available = round.available();
        if available.len() < 2 {
            return Err(QuoteError::InsufficientQuotes(available.len()));
        }

        // Leg 1 converts on the venue giving the most output; leg 2 unwinds
        // on the venue pricing the pair lowest.
        let buy = available
            .iter()
            .max_by(|a, b| a.rate.total_cmp(&b.rate))
            .copied()
            .ok_or(QuoteError::AllVenuesFailed)?;
        let sell = available
            .iter()
            .min_by(|a, b| a.rate.total_cmp(&b.rate))
            .copied()
            .ok_or(QuoteError::AllVenuesFailed)?;

        let spread_pct = Self::spread_pct(buy.rate, sell.rate);
        let gas_cost_usd = self.estimate_gas_cost_usd(&[buy, sell]).await;
        let threshold_pct = self.execution_threshold_pct(notional_usd, gas_cost_usd);

        if spread_pct.abs() < threshold_pct {
            info!(
                target: "quotes",
                spread_pct, threshold_pct, pair = round.pair,
                "spread below execution threshold"
            );
            return Err(QuoteError::NotProfitable { spread_pct, threshold_pct });
        }

        Ok(SpreadOpportunity {
            buy_venue: buy.venue.clone(),
            sell_venue: sell.venue.clone(),
            spread_pct,
            threshold_pct,
            buy_quote: buy.clone(),
            sell_quote: sell.clone(),
        })
    }
}
