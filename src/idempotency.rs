//! # Idempotency Cache
//!
//! Maps a request fingerprint to the response it originally produced, so a
//! retried request is served the exact prior payload instead of re-executing
//! side effects. Strict TTL policy only: entries die at TTL regardless of
//! access pattern, and the over-ceiling prune removes expired entries rather
//! than recently-unused ones.

use ethers::types::Address;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::errors::StoreError;
use crate::metrics::IDEMPOTENT_HITS;
use crate::store::KeyedStore;

#[derive(Debug)]
pub struct IdempotencyCache {
    store: Arc<dyn KeyedStore>,
    ttl: Duration,
    max_entries: usize,
}

impl IdempotencyCache {
    pub fn new(store: Arc<dyn KeyedStore>, ttl: Duration, max_entries: usize) -> Self {
        Self { store, ttl, max_entries }
    }

    /// Derives the cache key for an action: the caller's explicit token when
    /// present, else `(signer, nonce)` for nonce-bound actions. Returns
    /// `None` when the request carries nothing to fingerprint, in which case
    /// the action runs unguarded.
    pub fn derive_key(
        scope: &str,
        explicit_token: Option<&str>,
        signer: Option<Address>,
        nonce: Option<&str>,
    ) -> Option<String> {
        if let Some(token) = explicit_token.filter(|t| !t.is_empty()) {
            return Some(format!("idem:{scope}:token:{token}"));
        }
        match (signer, nonce) {
            (Some(signer), Some(nonce)) => Some(format!("idem:{scope}:{signer:#x}:{nonce}")),
            _ => None,
        }
    }

    /// Returns the cached payload if the key was stored within its TTL.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let hit = self.store.get(key).await?.map(|entry| entry.value);
        if hit.is_some() {
            IDEMPOTENT_HITS.inc();
            debug!(target: "idempotency", key, "serving cached response");
        }
        Ok(hit)
    }

    /// Caches a response payload. When the store has grown past its ceiling,
    /// expired entries are evicted first; live entries are never displaced.
    pub async fn put(&self, key: &str, payload: Value) -> Result<(), StoreError> {
        if self.store.len().await >= self.max_entries {
            let pruned = self.store.prune_expired().await;
            debug!(target: "idempotency", pruned, "over ceiling, pruned expired entries");
        }
        self.store.put(key, payload, self.ttl).await
    }
}
