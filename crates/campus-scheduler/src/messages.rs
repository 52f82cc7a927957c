use tokio::sync::oneshot;

use crate::task::Task;

#[derive(Debug)]
pub(crate) enum SchedulerCommand<E> {
    Submit(Task<E>),
    Clear { ack: oneshot::Sender<usize> },
    Shutdown,
}

/// Entries of the dispatcher's delay queue.
#[derive(Debug)]
pub(crate) enum Wakeup<E> {
    /// The minimum spacing since the last dispatch has elapsed.
    Pace,
    /// Backoff finished; the task keeps its slot and runs its next attempt.
    Retry(Task<E>),
}

#[derive(Debug)]
pub(crate) struct AttemptOutcome<E> {
    pub(crate) task: Task<E>,
    /// `None` when the operation panicked.
    pub(crate) result: Option<Result<(), E>>,
}

#[derive(Debug)]
pub(crate) enum ExecutionEvent<E> {
    Completed(Task<E>),
    RetryableFailure(Task<E>, E),
    FatalFailure(Task<E>, E),
    Panicked(Task<E>),
}
