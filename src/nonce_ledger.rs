//! # Nonce Ledger
//!
//! Single-use replay guard for wallet-signed actions. A (scope, signer,
//! nonce) tuple is consumable at most once, ever; consumption is an atomic
//! check-then-insert on the keyed store, so concurrent attempts on the same
//! tuple have exactly one winner.

use ethers::types::Address;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::errors::StoreError;
use crate::store::{Clock, KeyedStore};

#[derive(Debug)]
pub struct NonceLedger {
    store: Arc<dyn KeyedStore>,
    clock: Arc<dyn Clock>,
    skew_window_secs: i64,
}

impl NonceLedger {
    pub fn new(store: Arc<dyn KeyedStore>, clock: Arc<dyn Clock>, skew_window: Duration) -> Self {
        Self { store, clock, skew_window_secs: skew_window.as_secs() as i64 }
    }

    fn record_key(scope: &str, signer: Address, nonce: &str) -> String {
        format!("nonce:{scope}:{signer:#x}:{nonce}")
    }

    /// Attempts to consume the tuple. Returns `true` and records it only if
    /// no prior record exists and `timestamp` is inside the skew window;
    /// otherwise `false` with no side effects.
    pub async fn consume(
        &self,
        scope: &str,
        signer: Address,
        nonce: &str,
        timestamp: i64,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now_unix();
        if (now - timestamp).abs() > self.skew_window_secs {
            debug!(target: "nonce_ledger", scope, signer = ?signer, "nonce timestamp outside skew window");
            return Ok(false);
        }

        let record = json!({
            "scope": scope,
            "signer": format!("{signer:#x}"),
            "nonce": nonce,
            "timestamp": timestamp,
        });

        // A signed timestamp is only accepted while |now - timestamp| is
        // inside the window, so its validity ends no later than insertion
        // time + 2 windows. Holding the record that long means GC can never
        // resurrect a nonce that is still acceptable.
        let ttl = Duration::from_secs((self.skew_window_secs as u64) * 2);
        let consumed = self
            .store
            .put_if_absent(&Self::record_key(scope, signer, nonce), record, ttl)
            .await?;

        if !consumed {
            debug!(target: "nonce_ledger", scope, signer = ?signer, "nonce replay rejected");
        }
        Ok(consumed)
    }

    /// Opportunistic cleanup of records past their retention window.
    pub async fn garbage_collect(&self) -> usize {
        self.store.prune_expired().await
    }
}
