//! Prometheus metrics for the execution pipeline, exposed at `GET /metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, Encoder, Histogram, HistogramOpts, IntCounter,
    TextEncoder,
};

lazy_static! {
    pub static ref TX_SUBMITTED: IntCounter = register_int_counter!(
        "fx_engine_tx_submitted_total",
        "Total on-chain transactions submitted"
    )
    .unwrap();
    pub static ref TX_CONFIRMED: IntCounter = register_int_counter!(
        "fx_engine_tx_confirmed_total",
        "Total on-chain transactions confirmed"
    )
    .unwrap();
    pub static ref TX_FAILED: IntCounter =
        register_int_counter!("fx_engine_tx_failed_total", "Total on-chain transaction failures")
            .unwrap();
    pub static ref IDEMPOTENT_HITS: IntCounter = register_int_counter!(
        "fx_engine_idempotent_hits_total",
        "Requests served from the idempotency cache"
    )
    .unwrap();
    pub static ref NONCE_REPLAYS_REJECTED: IntCounter = register_int_counter!(
        "fx_engine_nonce_replays_rejected_total",
        "Wallet-signed requests rejected for nonce reuse or skew"
    )
    .unwrap();
    pub static ref QUOTE_LATENCY: Histogram = register_histogram!(HistogramOpts::new(
        "fx_engine_quote_latency_seconds",
        "Venue quote round-trip latency"
    )
    .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]))
    .unwrap();
}

/// Renders the default registry in the Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}
