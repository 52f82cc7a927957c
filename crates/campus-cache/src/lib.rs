//! Response cache with TTL expiry and single-flight fetches.
//!
//! [`ResponseCache::get`] either returns a live value, joins the fetch that
//! is already running for the key, or starts exactly one new fetch.
//! [`CachePolicy`] fixes key and lifetime per resource kind.

pub mod cache;
mod entry;
pub mod errors;
pub mod policy;
pub mod sweeper;

pub use cache::ResponseCache;
pub use entry::CacheStats;
pub use errors::CacheError;
pub use policy::{CachePolicy, Refresh};
pub use sweeper::SweeperHandle;
