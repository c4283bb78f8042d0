//! # fx-engine
//!
//! Authenticated, idempotent, multi-step on-chain execution pipeline behind
//! an autonomous FX/arbitrage agent: caller verification under two trust
//! models, signature-replay prevention, exactly-once retries over an
//! at-least-once transport, dependent-transaction sequencing with
//! partial-failure recovery, and proof-of-payment verification for pooled
//! capital.

pub mod api;
pub mod auth;
pub mod chain;
pub mod config;
pub mod deposit;
pub mod errors;
pub mod idempotency;
pub mod metrics;
pub mod nonce_ledger;
pub mod notifier;
pub mod orchestrator;
pub mod orders;
pub mod price_feeds;
pub mod quotes;
pub mod store;
pub mod types;
pub mod vault;
