use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;

use campus_core::TaskId;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::errors::SchedulerError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    InFlight { attempt: u32 },
    Completed,
}

#[derive(Debug, Error)]
pub enum TaskTransitionError {
    #[error("illegal task transition from {from} to {to}")]
    Illegal {
        from: &'static str,
        to: &'static str,
    },
}

impl Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Queued => write!(f, "Queued"),
            TaskState::InFlight { attempt } => write!(f, "InFlight(attempt={})", attempt),
            TaskState::Completed => write!(f, "Completed"),
        }
    }
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "Queued",
            TaskState::InFlight { .. } => "InFlight",
            TaskState::Completed => "Completed",
        }
    }

    pub fn mark_as_in_flight(&self) -> Result<TaskState, TaskTransitionError> {
        match self {
            TaskState::Queued => Ok(TaskState::InFlight { attempt: 1 }),
            state => Err(TaskTransitionError::Illegal {
                from: state.as_str(),
                to: "InFlight",
            }),
        }
    }

    /// Moves an in-flight task on to its next attempt.
    pub fn mark_as_retrying(&self) -> Result<TaskState, TaskTransitionError> {
        match self {
            TaskState::InFlight { attempt } => Ok(TaskState::InFlight {
                attempt: attempt.saturating_add(1),
            }),
            state => Err(TaskTransitionError::Illegal {
                from: state.as_str(),
                to: "InFlight",
            }),
        }
    }

    /// Queued tasks complete when they are cleared, in-flight ones when they settle.
    pub fn mark_as_completed(&self) -> Result<TaskState, TaskTransitionError> {
        match self {
            TaskState::Queued | TaskState::InFlight { .. } => Ok(TaskState::Completed),
            state => Err(TaskTransitionError::Illegal {
                from: state.as_str(),
                to: "Completed",
            }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed)
    }

    /// 1-based number of the attempt currently running, 0 when none started.
    pub fn attempt(&self) -> u32 {
        match self {
            TaskState::InFlight { attempt } => *attempt,
            _ => 0,
        }
    }
}

/// Per-call overrides accepted by [`crate::RequestScheduler::submit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    pub priority: i32,
    pub retries: Option<u32>,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// Type-erased operation plus the caller's completion channel.
pub(crate) trait Job<E>: Send {
    /// Starts one attempt. A successful attempt settles the caller before resolving.
    fn attempt(&mut self) -> BoxFuture<'static, Result<(), E>>;

    fn reject(self: Box<Self>, error: SchedulerError<E>);
}

pub(crate) type Reply<T, E> = oneshot::Sender<Result<T, SchedulerError<E>>>;

struct ReplyJob<F, T, E> {
    operation: F,
    reply: Arc<Mutex<Option<Reply<T, E>>>>,
}

impl<F, Fut, T, E> Job<E> for ReplyJob<F, T, E>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    fn attempt(&mut self) -> BoxFuture<'static, Result<(), E>> {
        let pending = (self.operation)();
        let reply = Arc::clone(&self.reply);

        async move {
            let value = pending.await?;
            if let Some(tx) = reply.lock().take() {
                // the caller may have stopped waiting
                let _ = tx.send(Ok(value));
            }
            Ok(())
        }
        .boxed()
    }

    fn reject(self: Box<Self>, error: SchedulerError<E>) {
        if let Some(tx) = self.reply.lock().take() {
            let _ = tx.send(Err(error));
        }
    }
}

pub(crate) struct Task<E> {
    pub(crate) id: TaskId,
    pub(crate) priority: i32,
    pub(crate) retries_remaining: u32,
    pub(crate) enqueued_at: Instant,
    pub(crate) state: TaskState,
    job: Box<dyn Job<E>>,
}

impl<E: Send + 'static> Task<E> {
    pub(crate) fn new<F, Fut, T>(operation: F, priority: i32, retries: u32, reply: Reply<T, E>) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
    {
        let job = ReplyJob {
            operation,
            reply: Arc::new(Mutex::new(Some(reply))),
        };
        Self::from_job(Box::new(job), priority, retries)
    }

    pub(crate) fn from_job(job: Box<dyn Job<E>>, priority: i32, retries: u32) -> Self {
        Self {
            id: TaskId::new(),
            priority,
            retries_remaining: retries,
            enqueued_at: Instant::now(),
            state: TaskState::Queued,
            job,
        }
    }
}

impl<E> Task<E> {
    pub(crate) fn dispatch(&mut self) -> Result<(), TaskTransitionError> {
        self.state = self.state.mark_as_in_flight()?;
        Ok(())
    }

    pub(crate) fn retry(&mut self) -> Result<(), TaskTransitionError> {
        self.state = self.state.mark_as_retrying()?;
        self.retries_remaining = self.retries_remaining.saturating_sub(1);
        Ok(())
    }

    pub(crate) fn complete(&mut self) -> Result<(), TaskTransitionError> {
        self.state = self.state.mark_as_completed()?;
        Ok(())
    }

    pub(crate) fn run_attempt(&mut self) -> BoxFuture<'static, Result<(), E>> {
        self.job.attempt()
    }

    pub(crate) fn reject(self, error: SchedulerError<E>) {
        self.job.reject(error);
    }
}

impl<E> fmt::Debug for Task<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("retries_remaining", &self.retries_remaining)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
