use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use campus_core::{CacheConfig, TransportError};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    entry::{CacheEntry, CacheStats},
    errors::CacheError,
};

type Flight<V, E> = Shared<BoxFuture<'static, Result<V, CacheError<E>>>>;

struct PendingFetch<V, E> {
    id: u64,
    flight: Flight<V, E>,
}

pub(crate) struct CacheState<V, E> {
    entries: HashMap<String, CacheEntry<V>>,
    pending: HashMap<String, PendingFetch<V, E>>,
    next_flight: u64,
}

impl<V, E> CacheState<V, E> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            pending: HashMap::new(),
            next_flight: 0,
        }
    }

    pub(crate) fn cleanup(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_valid_at(now));
        before - self.entries.len()
    }

    fn remove_where(&mut self, matches: impl Fn(&str) -> bool) -> usize {
        let before = self.entries.len() + self.pending.len();
        self.entries.retain(|key, _| !matches(key));
        self.pending.retain(|key, _| !matches(key));
        before - self.entries.len() - self.pending.len()
    }
}

/// TTL cache for fetched responses with at most one fetch in flight per key.
///
/// Clones share the same storage.
pub struct ResponseCache<V, E = TransportError> {
    pub(crate) state: Arc<Mutex<CacheState<V, E>>>,
    default_ttl: Duration,
}

impl<V, E> Clone for ResponseCache<V, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            default_ttl: self.default_ttl,
        }
    }
}

impl<V, E> fmt::Debug for ResponseCache<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ResponseCache")
            .field("default_ttl", &self.default_ttl)
            .field("entries", &state.entries.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl<V, E> ResponseCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub fn new(default_ttl: Duration) -> Self {
        info!(default_ttl_ms = default_ttl.as_millis(), "initializing response cache");

        Self {
            state: Arc::new(Mutex::new(CacheState::new())),
            default_ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.default_ttl())
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the cached value for `key`, fetching it with the default TTL on a miss.
    pub async fn get<F, Fut>(&self, key: &str, fetch: F) -> Result<V, CacheError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.get_with_ttl(key, self.default_ttl, fetch).await
    }

    /// Returns the cached value for `key` or joins/starts the single fetch for it.
    ///
    /// Concurrent callers for the same key share one invocation of `fetch`.
    /// Failures are handed to every waiter and never stored.
    pub async fn get_with_ttl<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<V, CacheError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let flight = {
            let mut state = self.state.lock();

            match state.entries.get(key) {
                Some(entry) if entry.is_valid_at(Instant::now()) => {
                    debug!(key, "cache hit");
                    return Ok(entry.value.clone());
                }
                Some(_) => {
                    debug!(key, "evicting stale entry");
                    state.entries.remove(key);
                }
                None => {}
            }

            match state.pending.get(key) {
                Some(pending) => {
                    debug!(key, flight = pending.id, "joining in-flight fetch");
                    pending.flight.clone()
                }
                None => {
                    let id = state.next_flight;
                    state.next_flight += 1;

                    let flight = self.start_fetch(key.to_owned(), id, ttl, fetch);
                    state.pending.insert(
                        key.to_owned(),
                        PendingFetch {
                            id,
                            flight: flight.clone(),
                        },
                    );
                    flight
                }
            }
        };

        flight.await
    }

    fn start_fetch<F, Fut>(&self, key: String, id: u64, ttl: Duration, fetch: F) -> Flight<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        debug!(key = %key, flight = id, ttl_ms = ttl.as_millis(), "cache miss, fetching");

        let (tx, rx) = oneshot::channel();
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(async move { fetch().await })
                .catch_unwind()
                .await
            {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(CacheError::Fetch(Arc::new(err))),
                Err(_) => {
                    warn!(key = %key, flight = id, "fetch panicked");
                    Err(CacheError::FetchAborted)
                }
            };

            settle(&state, &key, id, ttl, &outcome);
            let _ = tx.send(outcome);
        });

        rx.map(|received| received.unwrap_or(Err(CacheError::FetchAborted)))
            .boxed()
            .shared()
    }

    pub fn set(&self, key: &str, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl(&self, key: &str, value: V, ttl: Duration) {
        self.state
            .lock()
            .entries
            .insert(key.to_owned(), CacheEntry::new(value, ttl));
    }

    /// Drops the entry and any in-flight fetch for `key`.
    ///
    /// Waiters of a dropped fetch still receive its outcome, but the value is
    /// not stored.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        let entry = state.entries.remove(key).is_some();
        let pending = state.pending.remove(key).is_some();
        if entry || pending {
            debug!(key, "cache key invalidated");
        }
        entry || pending
    }

    /// Drops entries and in-flight fetches whose key matches `pattern`.
    ///
    /// Returns how many map slots were removed.
    pub fn invalidate_pattern(&self, pattern: &Regex) -> usize {
        let removed = self.remove_where(|key| pattern.is_match(key));
        debug!(pattern = %pattern, removed, "cache pattern invalidated");
        removed
    }

    pub(crate) fn remove_where(&self, matches: impl Fn(&str) -> bool) -> usize {
        self.state.lock().remove_where(matches)
    }

    /// Whether `key` holds a live entry. A stale entry is evicted.
    pub fn has(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        match state.entries.get(key) {
            Some(entry) if entry.is_valid_at(Instant::now()) => true,
            Some(_) => {
                state.entries.remove(key);
                false
            }
            None => false,
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let now = Instant::now();
        let valid_keys = state
            .entries
            .values()
            .filter(|entry| entry.is_valid_at(now))
            .count();

        CacheStats {
            total_keys: state.entries.len(),
            valid_keys,
            expired_keys: state.entries.len() - valid_keys,
            pending_requests: state.pending.len(),
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.pending.clear();
        info!("response cache cleared");
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn cleanup(&self) -> usize {
        let removed = self.state.lock().cleanup(Instant::now());
        if removed > 0 {
            debug!(removed, "expired cache entries removed");
        }
        removed
    }
}

/// Retires the pending marker for flight `id` and stores a successful value.
fn settle<V: Clone, E>(
    state: &Mutex<CacheState<V, E>>,
    key: &str,
    id: u64,
    ttl: Duration,
    outcome: &Result<V, CacheError<E>>,
) {
    let mut state = state.lock();

    if state.pending.get(key).is_none_or(|pending| pending.id != id) {
        debug!(key, flight = id, "fetch settled after invalidation, result not stored");
        return;
    }
    state.pending.remove(key);

    match outcome {
        Ok(value) => {
            state
                .entries
                .insert(key.to_owned(), CacheEntry::new(value.clone(), ttl));
        }
        Err(_) => debug!(key, flight = id, "fetch failed, nothing stored"),
    }
}
