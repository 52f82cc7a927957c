use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub(crate) struct CacheEntry<V> {
    pub(crate) value: V,
    pub(crate) stored_at: Instant,
    pub(crate) ttl: Duration,
}

impl<V> CacheEntry<V> {
    pub(crate) fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
            ttl,
        }
    }

    pub(crate) fn is_valid_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

/// Counts reported by [`crate::ResponseCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_keys: usize,
    pub valid_keys: usize,
    pub expired_keys: usize,
    pub pending_requests: usize,
}
