use std::sync::Arc;

use thiserror::Error;

/// Outcome delivered to every caller waiting on a failed fetch.
#[derive(Debug, Error)]
pub enum CacheError<E> {
    #[error("fetch failed: {0}")]
    Fetch(Arc<E>),

    #[error("fetch was aborted before it settled")]
    FetchAborted,
}

impl<E> Clone for CacheError<E> {
    fn clone(&self) -> Self {
        match self {
            CacheError::Fetch(err) => CacheError::Fetch(Arc::clone(err)),
            CacheError::FetchAborted => CacheError::FetchAborted,
        }
    }
}

impl<E> CacheError<E> {
    /// The error returned by the fetch function, if it returned one.
    pub fn fetch_error(&self) -> Option<&E> {
        match self {
            CacheError::Fetch(err) => Some(err.as_ref()),
            CacheError::FetchAborted => None,
        }
    }
}
