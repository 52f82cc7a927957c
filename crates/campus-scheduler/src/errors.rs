use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError<E> {
    /// The operation failed on its last permitted attempt.
    #[error("operation failed: {0}")]
    Operation(E),

    #[error("operation panicked")]
    Aborted,

    #[error("task was discarded by a queue clear")]
    QueueCleared,

    #[error("scheduler shut down before the task settled")]
    ShutDown,
}

impl<E> SchedulerError<E> {
    /// The transport error, when the operation itself produced one.
    pub fn into_operation(self) -> Option<E> {
        match self {
            SchedulerError::Operation(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_queue_cleared(&self) -> bool {
        matches!(self, SchedulerError::QueueCleared)
    }
}
