//! Client-side request scheduler.
//!
//! [`RequestScheduler`] bounds how many transport operations run at once,
//! keeps a minimum spacing between dispatches, orders waiting work by
//! priority and retries rate-limited or network-level failures with
//! exponential backoff.

pub mod backoff;
mod dispatcher;
pub mod errors;
mod messages;
mod queue;
pub mod scheduler;
pub mod task;

pub use errors::SchedulerError;
pub use scheduler::{RequestScheduler, SchedulerStatus, TaskHandle};
pub use task::{SubmitOptions, TaskState, TaskTransitionError};
