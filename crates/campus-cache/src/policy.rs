//! TTL presets for the resources the console lists.
//!
//! Reference data such as academic years or subjects rarely changes during a
//! session; rosters are edited all day and get shorter lifetimes.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::{cache::ResponseCache, errors::CacheError};

const REFERENCE_TTL: Duration = Duration::from_secs(5 * 60);
const STAFF_TTL: Duration = Duration::from_secs(3 * 60);
const ROSTER_TTL: Duration = Duration::from_secs(2 * 60);

/// Fixed cache key and lifetime for one kind of resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub key: &'static str,
    pub ttl: Duration,
}

impl CachePolicy {
    pub const ACADEMIC_YEARS: Self = Self::new("academic-years", REFERENCE_TTL);
    pub const DEPARTMENTS: Self = Self::new("departments", REFERENCE_TTL);
    pub const SUBJECTS: Self = Self::new("subjects", REFERENCE_TTL);
    pub const CLASSES: Self = Self::new("classes", REFERENCE_TTL);
    pub const TEACHERS: Self = Self::new("teachers", STAFF_TTL);
    pub const STUDENTS: Self = Self::new("students", ROSTER_TTL);

    pub const ALL: [Self; 6] = [
        Self::ACADEMIC_YEARS,
        Self::DEPARTMENTS,
        Self::SUBJECTS,
        Self::CLASSES,
        Self::TEACHERS,
        Self::STUDENTS,
    ];

    pub const fn new(key: &'static str, ttl: Duration) -> Self {
        Self { key, ttl }
    }

    /// Key for a filtered view of the resource, e.g. `students:class-7a`.
    pub fn scoped(&self, scope: impl Display) -> String {
        format!("{}:{}", self.key, scope)
    }

    /// Whether `key` is the base key or one of its scoped keys.
    pub fn covers(&self, key: &str) -> bool {
        match key.strip_prefix(self.key) {
            Some(rest) => rest.is_empty() || rest.starts_with(':'),
            None => false,
        }
    }
}

/// Whether a policy lookup may reuse a live entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Refresh {
    #[default]
    IfStale,
    Force,
}

impl<V, E> ResponseCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub async fn fetch_with_policy<F, Fut>(
        &self,
        policy: &CachePolicy,
        refresh: Refresh,
        fetch: F,
    ) -> Result<V, CacheError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.fetch_key(policy.key, policy.ttl, refresh, fetch).await
    }

    /// Like [`ResponseCache::fetch_with_policy`] for a filtered view.
    pub async fn fetch_scoped<F, Fut>(
        &self,
        policy: &CachePolicy,
        scope: impl Display,
        refresh: Refresh,
        fetch: F,
    ) -> Result<V, CacheError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let key = policy.scoped(scope);
        self.fetch_key(&key, policy.ttl, refresh, fetch).await
    }

    async fn fetch_key<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        refresh: Refresh,
        fetch: F,
    ) -> Result<V, CacheError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if refresh == Refresh::Force {
            debug!(key, "forced refresh");
            self.invalidate(key);
        }
        self.get_with_ttl(key, ttl, fetch).await
    }

    /// Drops the base key and every scoped key of `policy`, e.g. after a mutation.
    pub fn invalidate_policy(&self, policy: &CachePolicy) -> usize {
        let removed = self.remove_where(|key| policy.covers(key));
        debug!(policy = policy.key, removed, "policy keys invalidated");
        removed
    }
}
