use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::task::{Context, Poll};

use campus_core::{ConfigError, SchedulerConfig, TaskId, TransportFailure};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    dispatcher::{Counters, dispatch_loop},
    errors::SchedulerError,
    messages::SchedulerCommand,
    task::{SubmitOptions, Task},
};

/// Snapshot returned by [`RequestScheduler::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub queue_length: usize,
    pub in_flight: usize,
    pub max_concurrent: usize,
}

/// Bounds, paces and retries outbound requests.
///
/// Must be created inside a tokio runtime; the dispatcher runs as a spawned
/// task until [`RequestScheduler::shutdown`] is called or the scheduler is
/// dropped and its remaining work has drained.
#[derive(Debug)]
pub struct RequestScheduler<E> {
    cmd_tx: mpsc::UnboundedSender<SchedulerCommand<E>>,
    counters: Arc<Counters>,
    config: SchedulerConfig,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<E> RequestScheduler<E>
where
    E: TransportFailure + Send + 'static,
{
    /// Fails when `config` does not pass [`SchedulerConfig::validate`].
    pub fn new(config: SchedulerConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        info!(
            max_concurrent = config.max_concurrent,
            retry_attempts = config.retry_attempts,
            "initializing request scheduler"
        );

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let dispatcher = tokio::spawn(dispatch_loop(config.clone(), Arc::clone(&counters), cmd_rx));

        Ok(Self {
            cmd_tx,
            counters,
            config,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    /// Queues `operation` and returns a handle that settles with its final outcome.
    ///
    /// The operation is invoked once per attempt, so it must be able to build
    /// a fresh request every time it is called.
    pub fn submit<F, Fut, T>(&self, operation: F, options: SubmitOptions) -> TaskHandle<T, E>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let retries = options.retries.unwrap_or(self.config.retry_attempts);
        let task = Task::new(operation, options.priority, retries, reply_tx);
        let id = task.id.clone();

        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        if self.cmd_tx.send(SchedulerCommand::Submit(task)).is_err() {
            // the task is dropped with its reply sender; the handle reports shutdown
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            warn!(task_id = %id, "submit after scheduler shutdown");
        }

        TaskHandle { id, rx: reply_rx }
    }

    /// Rejects every task that has not been dispatched yet.
    ///
    /// Returns the number of rejected tasks. Tasks already running keep going.
    pub async fn clear(&self) -> usize {
        let (ack, done) = oneshot::channel();
        if self.cmd_tx.send(SchedulerCommand::Clear { ack }).is_err() {
            return 0;
        }
        done.await.unwrap_or(0)
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            queue_length: self.counters.queued.load(Ordering::SeqCst),
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
            max_concurrent: self.config.max_concurrent,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub async fn shutdown(&self) {
        info!("request scheduler shutdown initiated");

        let _ = self.cmd_tx.send(SchedulerCommand::Shutdown);

        if let Some(handle) = self.dispatcher.lock().await.take() {
            let _ = handle.await;
        }

        info!("request scheduler shutdown complete");
    }
}

/// Settles once with the operation's value or its final error.
#[derive(Debug)]
pub struct TaskHandle<T, E> {
    id: TaskId,
    rx: oneshot::Receiver<Result<T, SchedulerError<E>>>,
}

impl<T, E> TaskHandle<T, E> {
    pub fn id(&self) -> &TaskId {
        &self.id
    }
}

impl<T, E> Future for TaskHandle<T, E> {
    type Output = Result<T, SchedulerError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => {
                debug!(task_id = %self.id, "task dropped without settling");
                Poll::Ready(Err(SchedulerError::ShutDown))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
