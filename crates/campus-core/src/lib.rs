//! Shared vocabulary of the campus request governance layer.

pub mod config;
pub mod ids;
pub mod transport;

pub use config::{CacheConfig, ConfigError, GovernorConfig, SchedulerConfig};
pub use ids::TaskId;
pub use transport::{TransportError, TransportFailure};
