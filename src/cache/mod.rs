//! TTL cache with single-flight request coalescing.
//!
//! ## Overview
//!
//! `TtlCache` memoizes producer results for a short time and deduplicates
//! concurrent misses: while a fetch for a key is running, every other caller
//! for that key awaits the same shared future instead of starting a second
//! fetch. Errors are propagated to every waiter and never cached, so a failed
//! key is immediately retryable.
//!
//! ```text
//!   get_or_fetch("agents") ──┐
//!   get_or_fetch("agents") ──┼──> fresh entry?  ── yes ──> clone value
//!   get_or_fetch("agents") ──┘        │ no
//!                                     v
//!                              in-flight marker? ── yes ──> await shared future
//!                                     │ no
//!                                     v
//!                         spawn fetch, register marker ──> store on Ok,
//!                                                          drop marker always
//! ```
//!
//! Capacity is bounded; inserting a new key into a full cache evicts the
//! single oldest-inserted entry. Overwriting an existing key keeps its slot.
//!
//! The state lives behind a `std::sync::Mutex` that is never held across an
//! `.await`.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::FetchError;

/// Default number of entries kept before FIFO eviction starts.
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Default time-to-live for cached producer results.
pub const DEFAULT_TTL: Duration = Duration::from_secs(2);

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, FetchError>>>;

struct Entry<V> {
    value: V,
    expires_at: Instant,
    /// Insertion sequence number, the key into `CacheState::order`.
    seq: u64,
}

struct InFlight<V> {
    /// Generation of the fetch that owns this marker.
    id: u64,
    fut: SharedFetch<V>,
}

struct CacheState<V> {
    entries: HashMap<String, Entry<V>>,
    /// Insertion order (seq -> key); the first entry is the oldest.
    order: BTreeMap<u64, String>,
    in_flight: HashMap<String, InFlight<V>>,
    next_seq: u64,
    next_flight: u64,
    hits: u64,
    misses: u64,
}

impl<V: Clone> CacheState<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            in_flight: HashMap::new(),
            next_seq: 0,
            next_flight: 0,
            hits: 0,
            misses: 0,
        }
    }

    fn lookup(&mut self, key: &str, now: Instant) -> Option<V> {
        let fresh = match self.entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                self.remove_entry(key);
                None
            }
            None => None,
        };
        match fresh {
            Some(value) => {
                self.hits += 1;
                Some(value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    fn insert(&mut self, key: String, value: V, expires_at: Instant, max_entries: usize) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            entry.expires_at = expires_at;
            return;
        }

        if max_entries > 0 && self.entries.len() >= max_entries {
            if let Some((_, oldest)) = self.order.pop_first() {
                self.entries.remove(&oldest);
                debug!(event = "cache_evict", key = %oldest);
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at,
                seq,
            },
        );
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.order.remove(&entry.seq);
                true
            }
            None => false,
        }
    }
}

/// Snapshot of cache counters, as served by `GET /api/cache/stats`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// hits / (hits + misses), rounded to 3 decimals; 0 before any request.
    pub hit_rate: f64,
}

/// A TTL cache keyed by string with coalesced fetches.
///
/// Cloning is cheap and every clone shares the same store.
pub struct TtlCache<V> {
    state: Arc<Mutex<CacheState<V>>>,
    max_entries: usize,
    default_ttl: Duration,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            max_entries: self.max_entries,
            default_ttl: self.default_ttl,
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_TTL)
    }
}

fn lock_state<V>(state: &Mutex<CacheState<V>>) -> MutexGuard<'_, CacheState<V>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    /// `max_entries == 0` disables the capacity bound.
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::new())),
            max_entries,
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        lock_state(&self.state)
    }

    /// Fresh value for `key`, or `None` (expired entries are evicted here).
    pub fn get(&self, key: &str) -> Option<V> {
        self.lock().lookup(key, Instant::now())
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.lock()
            .insert(key.into(), value, expires_at, self.max_entries);
    }

    /// Return the cached value, join an in-flight fetch, or run `fetch`.
    ///
    /// `fetch` runs on a spawned task so a caller that gives up waiting does
    /// not strand the other waiters or leave the in-flight marker behind.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        fetch: F,
        ttl: Duration,
    ) -> Result<V, FetchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let shared = {
            let mut state = self.lock();
            if let Some(value) = state.lookup(key, Instant::now()) {
                return Ok(value);
            }
            match state.in_flight.get(key) {
                Some(flight) => {
                    debug!(event = "cache_coalesced", key);
                    flight.fut.clone()
                }
                None => {
                    let id = state.next_flight;
                    state.next_flight += 1;
                    let fut = self.spawn_fetch(key.to_string(), id, fetch, ttl);
                    state.in_flight.insert(
                        key.to_string(),
                        InFlight {
                            id,
                            fut: fut.clone(),
                        },
                    );
                    fut
                }
            }
        };
        shared.await
    }

    fn spawn_fetch<F, Fut>(&self, key: String, id: u64, fetch: F, ttl: Duration) -> SharedFetch<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let max_entries = self.max_entries;

        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(async move { fetch().await })
                .catch_unwind()
                .await;
            let result = match outcome {
                Ok(result) => result.map_err(FetchError::new),
                Err(_) => Err(FetchError::new(anyhow::anyhow!(
                    "fetch for '{}' panicked",
                    key
                ))),
            };

            let mut guard = lock_state(&state);
            // Only the fetch that registered the marker may clear it or
            // store; a delete/clear in the meantime wins.
            let owned = guard.in_flight.get(&key).is_some_and(|f| f.id == id);
            if owned {
                guard.in_flight.remove(&key);
                match &result {
                    Ok(value) => {
                        let expires_at = Instant::now() + ttl;
                        guard.insert(key, value.clone(), expires_at, max_entries);
                    }
                    Err(err) => debug!(event = "cache_fetch_failed", key = %key, error = %err),
                }
            }
            result
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(err) => Err(FetchError::new(anyhow::anyhow!("fetch task failed: {}", err))),
            }
        }
        .boxed()
        .shared()
    }

    /// Remove one entry and any in-flight marker for it.
    pub fn delete(&self, key: &str) -> bool {
        let mut state = self.lock();
        let had_flight = state.in_flight.remove(key).is_some();
        state.remove_entry(key) || had_flight
    }

    /// Remove every entry and in-flight marker. Counters are kept.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
        state.in_flight.clear();
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove_entry(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let total = state.hits + state.misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            (state.hits as f64 / total as f64 * 1000.0).round() / 1000.0
        };
        CacheStats {
            size: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
            hit_rate,
        }
    }
}
