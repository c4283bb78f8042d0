//! # Keyed Store
//!
//! The persistence seam behind the nonce ledger and idempotency cache: a
//! TTL-aware keyed store with an atomic check-then-insert. The in-memory
//! backend is the default; a shared external backend can replace it without
//! touching the exactly-once logic built on top. The clock is injected so
//! TTL behavior is testable without sleeping.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::StoreError;

/// Time source in unix seconds. Production uses [`SystemClock`]; tests use
/// [`ManualClock`] to step through TTL windows deterministically.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_unix(&self) -> i64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Settable clock for tests.
#[derive(Debug)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// A value with its insertion time, as returned by [`KeyedStore::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub value: Value,
    pub created_at: i64,
}

/// TTL-keyed storage. Implementations must make `put_if_absent` atomic with
/// respect to concurrent calls for the same key: exactly one caller wins.
#[async_trait]
pub trait KeyedStore: Send + Sync + std::fmt::Debug {
    /// Returns the live entry for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, StoreError>;

    /// Unconditional insert/overwrite with the given TTL.
    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError>;

    /// Inserts only if no live entry exists for `key`. Returns `true` iff
    /// this call created the entry. An expired entry counts as absent.
    async fn put_if_absent(
        &self,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Number of entries currently held, live or expired-but-unpruned.
    async fn len(&self) -> usize;

    /// Drops entries whose TTL has elapsed; returns how many were removed.
    async fn prune_expired(&self) -> usize;
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Value,
    created_at: i64,
    expires_at: i64,
}

/// Process-local [`KeyedStore`] backed by a concurrent map. Check-then-insert
/// goes through the map's entry API, so two racing `put_if_absent` calls for
/// one key serialize on its shard lock and exactly one wins.
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, MemoryEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { entries: DashMap::new(), clock }
    }

    fn is_live(&self, entry: &MemoryEntry) -> bool {
        self.clock.now_unix() < entry.expires_at
    }

    fn make_entry(&self, value: Value, ttl: Duration) -> MemoryEntry {
        let now = self.clock.now_unix();
        MemoryEntry { value, created_at: now, expires_at: now + ttl.as_secs() as i64 }
    }
}

#[async_trait]
impl KeyedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        match self.entries.get(key) {
            Some(entry) if self.is_live(&entry) => Ok(Some(StoredEntry {
                value: entry.value.clone(),
                created_at: entry.created_at,
            })),
            _ => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), self.make_entry(value, ttl));
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        use dashmap::mapref::entry::Entry;
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if self.is_live(occupied.get()) {
                    Ok(false)
                } else {
                    occupied.insert(self.make_entry(value, ttl));
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(self.make_entry(value, ttl));
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn len(&self) -> usize {
        self.entries.len()
    }

    async fn prune_expired(&self) -> usize {
        let before = self.entries.len();
        let now = self.clock.now_unix();
        self.entries.retain(|_, entry| now < entry.expires_at);
        before - self.entries.len()
    }
}
