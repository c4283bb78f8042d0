//! # External Price Feeds
//!
//! Two independent read-only reference feeds: a forex-rate service and a
//! crypto/commodity service. Feed unavailability is never a hard failure;
//! the caller gets the configured last-known fallback constant instead, so a
//! dead reference API can degrade threshold precision but cannot halt the
//! pipeline.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;
use tracing::warn;

use crate::config::FeedSettings;
use crate::types::FeedRate;

/// A reference price source. `rate` always yields a value: live when the
/// service answers, the fallback constant when it does not.
#[async_trait]
pub trait PriceFeed: Send + Sync + Debug {
    async fn rate(&self, base: &str, quote: &str) -> FeedRate;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Deserialize)]
struct ForexReply {
    rates: HashMap<String, f64>,
    #[serde(default)]
    timestamp: i64,
}

/// Fiat FX rates (e.g. EUR/USD) from an exchange-rate service.
#[derive(Debug, Clone)]
pub struct ForexRateFeed {
    client: Client,
    base_url: String,
    fallback_rate: f64,
}

impl ForexRateFeed {
    pub fn new(settings: &FeedSettings) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .user_agent("fx-engine/0.3")
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: settings.forex_feed_url.clone(),
            fallback_rate: settings.forex_fallback_rate,
        }
    }

    async fn fetch(&self, base: &str, quote: &str) -> Result<FeedRate, reqwest::Error> {
        let url = format!("{}?base={}&symbols={}", self.base_url, base, quote);
        let reply: ForexReply = self.client.get(&url).send().await?.json().await?;
        let rate = reply.rates.get(quote).copied().unwrap_or(self.fallback_rate);
        Ok(FeedRate { rate, as_of: reply.timestamp })
    }
}

#[async_trait]
impl PriceFeed for ForexRateFeed {
    fn name(&self) -> &'static str {
        "forex"
    }

    async fn rate(&self, base: &str, quote: &str) -> FeedRate {
        match self.fetch(base, quote).await {
            Ok(rate) => rate,
            Err(e) => {
                warn!(target: "price_feeds", feed = self.name(), error = %e, "feed unavailable, using fallback");
                FeedRate { rate: self.fallback_rate, as_of: 0 }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CryptoReply {
    #[serde(flatten)]
    prices: HashMap<String, HashMap<String, f64>>,
}

/// Crypto/commodity spot prices (e.g. native gas asset in USD).
#[derive(Debug, Clone)]
pub struct CryptoRateFeed {
    client: Client,
    base_url: String,
    fallback_rate: f64,
}

impl CryptoRateFeed {
    pub fn new(settings: &FeedSettings) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .user_agent("fx-engine/0.3")
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: settings.crypto_feed_url.clone(),
            fallback_rate: settings.crypto_fallback_rate,
        }
    }

    async fn fetch(&self, asset: &str, denom: &str) -> Result<Option<f64>, reqwest::Error> {
        let url = format!("{}?ids={}&vs_currencies={}", self.base_url, asset, denom);
        let reply: CryptoReply = self.client.get(&url).send().await?.json().await?;
        Ok(reply.prices.get(asset).and_then(|m| m.get(denom)).copied())
    }
}

#[async_trait]
impl PriceFeed for CryptoRateFeed {
    fn name(&self) -> &'static str {
        "crypto"
    }

    async fn rate(&self, base: &str, quote: &str) -> FeedRate {
        match self.fetch(base, quote).await {
            Ok(Some(rate)) => FeedRate { rate, as_of: chrono::Utc::now().timestamp() },
            Ok(None) => {
                warn!(target: "price_feeds", feed = self.name(), base, quote, "asset missing from reply, using fallback");
                FeedRate { rate: self.fallback_rate, as_of: 0 }
            }
            Err(e) => {
                warn!(target: "price_feeds", feed = self.name(), error = %e, "feed unavailable, using fallback");
                FeedRate { rate: self.fallback_rate, as_of: 0 }
            }
        }
    }
}

/// Fixed-rate feed for tests and for deployments that pin a reference rate.
#[derive(Debug, Clone)]
pub struct StaticFeed {
    pub fixed_rate: f64,
}

#[async_trait]
impl PriceFeed for StaticFeed {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn rate(&self, _base: &str, _quote: &str) -> FeedRate {
        FeedRate { rate: self.fixed_rate, as_of: 0 }
    }
}
