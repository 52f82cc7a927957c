use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use campus_core::{SchedulerConfig, TransportFailure};
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::time::DelayQueue;
use tracing::{debug, error, info, warn};

use crate::{
    backoff::compute_backoff,
    errors::SchedulerError,
    messages::{AttemptOutcome, ExecutionEvent, SchedulerCommand, Wakeup},
    queue::PriorityQueue,
    task::{Task, TaskTransitionError},
};

/// Counters shared with the scheduler handle for status reports.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) queued: AtomicUsize,
    pub(crate) in_flight: AtomicUsize,
}

struct Dispatcher<E> {
    config: SchedulerConfig,
    counters: Arc<Counters>,
    queue: PriorityQueue<E>,
    running: FuturesUnordered<BoxFuture<'static, AttemptOutcome<E>>>,
    delays: DelayQueue<Wakeup<E>>,
    in_flight: usize,
    last_dispatch: Option<Instant>,
    pace_armed: bool,
}

pub(crate) async fn dispatch_loop<E>(
    config: SchedulerConfig,
    counters: Arc<Counters>,
    mut cmd_rx: mpsc::UnboundedReceiver<SchedulerCommand<E>>,
) where
    E: TransportFailure + Send + 'static,
{
    info!(
        max_concurrent = config.max_concurrent,
        min_delay_ms = config.min_delay_ms,
        "request dispatcher started"
    );

    let mut dispatcher = Dispatcher::new(config, counters);
    let mut open = true;

    loop {
        dispatcher.pump();

        if !open && dispatcher.is_idle() {
            break;
        }

        tokio::select! {
            cmd = cmd_rx.recv(), if open => {
                let Some(cmd) = cmd else {
                    debug!("scheduler handle dropped, draining remaining tasks");
                    open = false;
                    continue;
                };

                // commands that queued up while the dispatcher was busy are
                // applied together so that priorities decide the next dispatch
                let mut flow = dispatcher.handle_command(cmd);
                while flow.is_continue() {
                    match cmd_rx.try_recv() {
                        Ok(cmd) => flow = dispatcher.handle_command(cmd),
                        Err(_) => break,
                    }
                }

                if flow.is_break() {
                    dispatcher.shutdown();
                    dispatcher.reject_late_commands(&mut cmd_rx);
                    break;
                }
            }

            Some(outcome) = dispatcher.running.next() => {
                let event = dispatcher.classify(outcome);
                dispatcher.handle_execution_event(event);
            }

            Some(expired) = dispatcher.delays.next() => {
                dispatcher.handle_wakeup(expired.into_inner());
            }

            else => {
                break;
            }
        }
    }

    info!("request dispatcher exited");
}

impl<E> Dispatcher<E>
where
    E: TransportFailure + Send + 'static,
{
    fn new(config: SchedulerConfig, counters: Arc<Counters>) -> Self {
        Self {
            config,
            counters,
            queue: PriorityQueue::new(),
            running: FuturesUnordered::new(),
            delays: DelayQueue::new(),
            in_flight: 0,
            last_dispatch: None,
            pace_armed: false,
        }
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight == 0
    }

    fn handle_command(&mut self, cmd: SchedulerCommand<E>) -> ControlFlow<()> {
        match cmd {
            SchedulerCommand::Submit(task) => {
                debug!(
                    task_id = %task.id,
                    priority = task.priority,
                    retries = task.retries_remaining,
                    queue_length = self.queue.len() + 1,
                    "task queued"
                );
                self.queue.push(task);
            }

            SchedulerCommand::Clear { ack } => {
                let cleared = self.reject_queued(|| SchedulerError::QueueCleared);
                info!(cleared, in_flight = self.in_flight, "queue cleared");
                let _ = ack.send(cleared);
            }

            SchedulerCommand::Shutdown => return ControlFlow::Break(()),
        }

        ControlFlow::Continue(())
    }

    /// Starts as many queued tasks as free slots and pacing allow.
    fn pump(&mut self) {
        while self.in_flight < self.config.max_concurrent && !self.queue.is_empty() {
            let now = Instant::now();

            if let Some(last) = self.last_dispatch {
                let elapsed = now.saturating_duration_since(last);
                let min_delay = self.config.min_delay();
                if elapsed < min_delay {
                    if !self.pace_armed {
                        self.delays.insert(Wakeup::Pace, min_delay - elapsed);
                        self.pace_armed = true;
                    }
                    return;
                }
            }

            let Some(mut task) = self.queue.pop() else {
                return;
            };
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);

            if let Err(err) = task.dispatch() {
                report_transition_error(&task, err);
            }

            self.in_flight += 1;
            self.counters.in_flight.store(self.in_flight, Ordering::SeqCst);
            self.last_dispatch = Some(now);

            debug!(
                task_id = %task.id,
                priority = task.priority,
                waited_ms = now.saturating_duration_since(task.enqueued_at).as_millis(),
                in_flight = self.in_flight,
                "dispatching task"
            );

            self.start_attempt(task);
        }
    }

    fn start_attempt(&mut self, mut task: Task<E>) {
        // a panicking operation fails its own task, never the dispatcher
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| task.run_attempt())).ok();

        self.running.push(
            async move {
                let result = match attempt {
                    Some(attempt) => AssertUnwindSafe(attempt).catch_unwind().await.ok(),
                    None => None,
                };
                AttemptOutcome { result, task }
            }
            .boxed(),
        );
    }

    fn classify(&self, outcome: AttemptOutcome<E>) -> ExecutionEvent<E> {
        let AttemptOutcome { task, result } = outcome;

        let err = match result {
            None => return ExecutionEvent::Panicked(task),
            Some(Ok(())) => return ExecutionEvent::Completed(task),
            Some(Err(err)) => err,
        };

        let first_attempt = task.state.attempt() <= 1;
        let retryable =
            err.is_retryable() || (self.config.retry_any_first_failure && first_attempt);

        if retryable && task.retries_remaining > 0 {
            ExecutionEvent::RetryableFailure(task, err)
        } else {
            ExecutionEvent::FatalFailure(task, err)
        }
    }

    fn handle_execution_event(&mut self, event: ExecutionEvent<E>) {
        match event {
            ExecutionEvent::Completed(mut task) => {
                let attempts = task.state.attempt();
                if let Err(err) = task.complete() {
                    report_transition_error(&task, err);
                }
                self.release_slot();
                debug!(task_id = %task.id, attempts, "task completed successfully");
            }

            ExecutionEvent::RetryableFailure(task, error) => {
                let failed_index = task.state.attempt().saturating_sub(1);
                let delay = compute_backoff(self.config.retry_base_delay(), failed_index);

                warn!(
                    task_id = %task.id,
                    attempts = task.state.attempt(),
                    retries_remaining = task.retries_remaining,
                    delay_ms = delay.as_millis(),
                    %error,
                    "scheduling retry"
                );
                self.delays.insert(Wakeup::Retry(task), delay);
            }

            ExecutionEvent::Panicked(mut task) => {
                let attempts = task.state.attempt();
                if let Err(err) = task.complete() {
                    report_transition_error(&task, err);
                }
                self.release_slot();
                error!(task_id = %task.id, attempts, "task operation panicked");
                task.reject(SchedulerError::Aborted);
            }

            ExecutionEvent::FatalFailure(mut task, error) => {
                let attempts = task.state.attempt();
                if let Err(err) = task.complete() {
                    report_transition_error(&task, err);
                }
                self.release_slot();
                error!(
                    task_id = %task.id,
                    attempts,
                    status = ?error.status(),
                    %error,
                    "task permanently failed"
                );
                task.reject(SchedulerError::Operation(error));
            }
        }
    }

    fn handle_wakeup(&mut self, wakeup: Wakeup<E>) {
        match wakeup {
            Wakeup::Pace => self.pace_armed = false,

            Wakeup::Retry(mut task) => {
                if let Err(err) = task.retry() {
                    report_transition_error(&task, err);
                }
                debug!(
                    task_id = %task.id,
                    attempt = task.state.attempt(),
                    "retrying task"
                );
                self.start_attempt(task);
            }
        }
    }

    fn release_slot(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.counters.in_flight.store(self.in_flight, Ordering::SeqCst);
    }

    fn reject_queued(&mut self, error: impl Fn() -> SchedulerError<E>) -> usize {
        let mut rejected = 0;
        for mut task in self.queue.drain() {
            if let Err(err) = task.complete() {
                report_transition_error(&task, err);
            }
            task.reject(error());
            rejected += 1;
        }
        self.counters.queued.fetch_sub(rejected, Ordering::SeqCst);
        rejected
    }

    fn shutdown(&mut self) {
        let rejected = self.reject_queued(|| SchedulerError::ShutDown);
        let abandoned = self.in_flight;

        // dropping attempts and pending retries closes their reply channels
        self.running.clear();
        self.delays.clear();
        self.in_flight = 0;
        self.counters.in_flight.store(0, Ordering::SeqCst);

        info!(rejected, abandoned, "request dispatcher shutting down");
    }

    /// Rejects commands that arrived after the shutdown request.
    fn reject_late_commands(&mut self, cmd_rx: &mut mpsc::UnboundedReceiver<SchedulerCommand<E>>) {
        cmd_rx.close();

        let mut rejected = 0;
        while let Ok(cmd) = cmd_rx.try_recv() {
            match cmd {
                SchedulerCommand::Submit(mut task) => {
                    self.counters.queued.fetch_sub(1, Ordering::SeqCst);
                    if let Err(err) = task.complete() {
                        report_transition_error(&task, err);
                    }
                    task.reject(SchedulerError::ShutDown);
                    rejected += 1;
                }
                SchedulerCommand::Clear { ack } => {
                    let _ = ack.send(0);
                }
                SchedulerCommand::Shutdown => {}
            }
        }

        if rejected > 0 {
            debug!(rejected, "rejected submits received after shutdown");
        }
    }
}

fn report_transition_error<E>(task: &Task<E>, err: TaskTransitionError) {
    error!(task_id = %task.id, state = %task.state, %err, "illegal task transition");
}
