use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use campus_core::{ConfigError, SchedulerConfig, TransportError};
use campus_scheduler::{RequestScheduler, SchedulerError, SubmitOptions};
use parking_lot::Mutex;
use tokio::time::{Instant, sleep};

fn scheduler(max_concurrent: usize, min_delay_ms: u64) -> RequestScheduler<TransportError> {
    RequestScheduler::new(
        SchedulerConfig::builder()
            .max_concurrent(max_concurrent)
            .min_delay_ms(min_delay_ms)
            .retry_attempts(3)
            .retry_base_delay_ms(1000)
            .build(),
    )
    .unwrap()
}

fn broken_operation() -> Result<u32, TransportError> {
    panic!("malformed attendance payload")
}

fn elapsed_ms(start: Instant) -> u128 {
    start.elapsed().as_millis()
}

#[tokio::test(start_paused = true)]
async fn in_flight_never_exceeds_max_concurrent() {
    let scheduler = scheduler(2, 0);
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            scheduler.submit(
                move || {
                    let current = Arc::clone(&current);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(50)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, TransportError>(i)
                    }
                },
                SubmitOptions::new(),
            )
        })
        .collect();

    sleep(Duration::from_millis(10)).await;
    let status = scheduler.status();
    assert_eq!(status.in_flight, 2);
    assert_eq!(status.queue_length, 8);
    assert_eq!(status.max_concurrent, 2);

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), i);
    }

    assert_eq!(peak.load(Ordering::SeqCst), 2);

    // callers are settled before the dispatcher frees the slot
    sleep(Duration::from_millis(1)).await;
    assert_eq!(scheduler.status().in_flight, 0);
    assert_eq!(scheduler.status().queue_length, 0);
}

#[tokio::test(start_paused = true)]
async fn higher_priority_dispatches_first() {
    let scheduler = scheduler(1, 0);
    let order = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = [1, 5, 3]
        .into_iter()
        .map(|priority| {
            let order = Arc::clone(&order);
            scheduler.submit(
                move || {
                    let order = Arc::clone(&order);
                    async move {
                        order.lock().push(priority);
                        Ok::<_, TransportError>(())
                    }
                },
                SubmitOptions::new().priority(priority),
            )
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(*order.lock(), vec![5, 3, 1]);
}

#[tokio::test(start_paused = true)]
async fn equal_priorities_run_in_submission_order() {
    let scheduler = scheduler(1, 0);
    let order = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let order = Arc::clone(&order);
            scheduler.submit(
                move || {
                    let order = Arc::clone(&order);
                    async move {
                        order.lock().push(i);
                        Ok::<_, TransportError>(())
                    }
                },
                SubmitOptions::new(),
            )
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn dispatches_are_spaced_by_min_delay() {
    let scheduler = scheduler(3, 150);
    let start = Instant::now();
    let started = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let started = Arc::clone(&started);
            scheduler.submit(
                move || {
                    let started = Arc::clone(&started);
                    async move {
                        started.lock().push(elapsed_ms(start));
                        Ok::<_, TransportError>(())
                    }
                },
                SubmitOptions::new(),
            )
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(*started.lock(), vec![0, 150, 300]);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_task_backs_off_exponentially() {
    let scheduler = scheduler(1, 0);
    let start = Instant::now();
    let attempts = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&attempts);
    let result = scheduler
        .submit(
            move || {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(elapsed_ms(start));
                    Err::<(), _>(TransportError::rate_limited())
                }
            },
            SubmitOptions::new(),
        )
        .await;

    // one initial attempt plus three retries after 1s, 2s and 4s
    assert_eq!(*attempts.lock(), vec![0, 1000, 3000, 7000]);

    let err = result.unwrap_err().into_operation().unwrap();
    assert_eq!(err.status, Some(429));
}

#[tokio::test(start_paused = true)]
async fn network_failure_recovers_on_retry() {
    let scheduler = scheduler(1, 0);
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let value = scheduler
        .submit(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TransportError::network("connection reset"))
                    } else {
                        Ok("students")
                    }
                }
            },
            SubmitOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(value, "students");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn non_retryable_failure_is_surfaced_immediately() {
    let scheduler = scheduler(1, 0);
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let err = scheduler
        .submit(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TransportError::http(404, "no such class"))
                }
            },
            SubmitOptions::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(err, SchedulerError::Operation(ref e) if e.status == Some(404)));
}

#[tokio::test(start_paused = true)]
async fn lenient_first_failure_retries_once() {
    let scheduler: RequestScheduler<TransportError> = RequestScheduler::new(
        SchedulerConfig::builder()
            .max_concurrent(1)
            .min_delay_ms(0)
            .retry_attempts(3)
            .retry_base_delay_ms(500)
            .retry_any_first_failure(true)
            .build(),
    )
    .unwrap();
    let start = Instant::now();
    let attempts = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&attempts);
    let err = scheduler
        .submit(
            move || {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(elapsed_ms(start));
                    Err::<(), _>(TransportError::http(500, "server error"))
                }
            },
            SubmitOptions::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(*attempts.lock(), vec![0, 500]);
    assert_eq!(err.into_operation().unwrap().status, Some(500));
}

#[tokio::test(start_paused = true)]
async fn per_call_retry_override() {
    let scheduler = scheduler(1, 0);
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let result = scheduler
        .submit(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TransportError::rate_limited())
                }
            },
            SubmitOptions::new().retries(0),
        )
        .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn clear_rejects_queued_and_spares_in_flight() {
    let scheduler = scheduler(1, 0);

    let running = scheduler.submit(
        || async {
            sleep(Duration::from_millis(100)).await;
            Ok::<_, TransportError>("timetable")
        },
        SubmitOptions::new(),
    );
    sleep(Duration::from_millis(10)).await;

    let queued: Vec<_> = (0..2)
        .map(|_| {
            scheduler.submit(
                || async { Ok::<_, TransportError>("never") },
                SubmitOptions::new().priority(10),
            )
        })
        .collect();
    assert_eq!(scheduler.status().queue_length, 2);

    assert_eq!(scheduler.clear().await, 2);
    assert_eq!(scheduler.status().queue_length, 0);

    for handle in queued {
        assert!(handle.await.unwrap_err().is_queue_cleared());
    }
    assert_eq!(running.await.unwrap(), "timetable");
}

#[tokio::test(start_paused = true)]
async fn clear_on_empty_queue_is_noop() {
    let scheduler = scheduler(3, 0);
    assert_eq!(scheduler.clear().await, 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_rejects_pending_work() {
    let scheduler = scheduler(1, 0);

    let running = scheduler.submit(
        || async {
            sleep(Duration::from_secs(60)).await;
            Ok::<_, TransportError>(())
        },
        SubmitOptions::new(),
    );
    let queued = scheduler.submit(|| async { Ok::<_, TransportError>(()) }, SubmitOptions::new());
    sleep(Duration::from_millis(10)).await;

    scheduler.shutdown().await;

    assert!(matches!(running.await, Err(SchedulerError::ShutDown)));
    assert!(matches!(queued.await, Err(SchedulerError::ShutDown)));

    let late = scheduler.submit(|| async { Ok::<_, TransportError>(()) }, SubmitOptions::new());
    assert!(matches!(late.await, Err(SchedulerError::ShutDown)));
}

#[tokio::test(start_paused = true)]
async fn dropped_scheduler_drains_remaining_tasks() {
    let scheduler = scheduler(1, 100);

    let handles: Vec<_> = (0..3)
        .map(|i| {
            scheduler.submit(
                move || async move { Ok::<_, TransportError>(i * 2) },
                SubmitOptions::new(),
            )
        })
        .collect();
    drop(scheduler);

    let mut values = Vec::new();
    for handle in handles {
        values.push(handle.await.unwrap());
    }
    assert_eq!(values, vec![0, 2, 4]);
}

#[tokio::test(start_paused = true)]
async fn zero_concurrency_is_rejected_at_construction() {
    let result = RequestScheduler::<TransportError>::new(
        SchedulerConfig::builder().max_concurrent(0).build(),
    );

    assert!(matches!(
        result,
        Err(ConfigError::Invalid {
            field: "scheduler.max_concurrent",
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn panicking_operation_fails_only_its_own_task() {
    let scheduler = scheduler(2, 0);

    let healthy = scheduler.submit(
        || async {
            sleep(Duration::from_millis(100)).await;
            Ok::<_, TransportError>(7)
        },
        SubmitOptions::new(),
    );
    let broken = scheduler.submit(|| async { broken_operation() }, SubmitOptions::new());

    assert!(matches!(broken.await, Err(SchedulerError::Aborted)));

    let later = scheduler.submit(|| async { Ok::<_, TransportError>(8) }, SubmitOptions::new());

    assert_eq!(healthy.await.unwrap(), 7);
    assert_eq!(later.await.unwrap(), 8);

    sleep(Duration::from_millis(1)).await;
    assert_eq!(scheduler.status().in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn operation_panicking_before_its_future_is_contained() {
    let scheduler = scheduler(1, 0);

    let broken = scheduler.submit(
        || -> std::future::Ready<Result<u32, TransportError>> { panic!("no request built") },
        SubmitOptions::new(),
    );
    let next = scheduler.submit(|| async { Ok::<_, TransportError>(1) }, SubmitOptions::new());

    assert!(matches!(broken.await, Err(SchedulerError::Aborted)));
    assert_eq!(next.await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn submits_racing_shutdown_are_rejected_and_uncounted() {
    let scheduler = scheduler(1, 0);

    let (_, late) = tokio::join!(scheduler.shutdown(), async {
        scheduler.submit(|| async { Ok::<_, TransportError>(()) }, SubmitOptions::new())
    });

    assert!(matches!(late.await, Err(SchedulerError::ShutDown)));
    assert_eq!(scheduler.status().queue_length, 0);
    assert_eq!(scheduler.status().in_flight, 0);
}
