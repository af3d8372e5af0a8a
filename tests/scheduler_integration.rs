//! Integration tests for the task scheduler.
//!
//! Each test runs the real dispatch loop on a background tokio task and
//! drives it only through the public API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::timeout;

use agent_core::config::SchedulerConfig;
use agent_core::error::TaskError;
use agent_core::worker::{FnHandler, Scheduler, TaskEvent, TaskStatus};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn scheduler(max_concurrent_tasks: usize) -> Scheduler {
    Scheduler::new(SchedulerConfig {
        max_concurrent_tasks,
        poll_interval: Duration::from_millis(10),
        ..Default::default()
    })
    .unwrap()
}

/// Handler that sleeps and tracks how many invocations overlap.
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }
}

#[tokio::test]
async fn echo_scenario() {
    timeout(TEST_TIMEOUT, async {
        let scheduler = scheduler(5);
        scheduler
            .register_handler(
                "echo",
                Arc::new(FnHandler::new(|payload: Value| async move {
                    Ok::<_, anyhow::Error>(payload)
                })),
            )
            .await;
        let handle = scheduler.spawn();

        scheduler
            .submit("t1", "echo", json!({"x": 1}), None)
            .await
            .unwrap();
        scheduler.wait_for("t1").await.unwrap();

        assert_eq!(scheduler.status("t1").await, Some(TaskStatus::Completed));
        assert_eq!(scheduler.result("t1").await, Some(json!({"x": 1})));

        scheduler.stop();
        handle.await.unwrap();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unregistered_type_is_not_a_failure() {
    timeout(TEST_TIMEOUT, async {
        let scheduler = scheduler(5);
        let handle = scheduler.spawn();

        scheduler
            .submit("m1", "mystery", json!({"q": "?"}), None)
            .await
            .unwrap();
        let done = scheduler.wait_for("m1").await.unwrap();

        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.error.is_none());
        let result = scheduler.result("m1").await.unwrap();
        assert_eq!(result["message"], "No handler for mystery");

        scheduler.stop();
        handle.await.unwrap();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn concurrency_never_exceeds_limit() {
    timeout(TEST_TIMEOUT, async {
        const LIMIT: usize = 3;
        let scheduler = scheduler(LIMIT);
        let gauge = Gauge::new();

        let g = gauge.clone();
        scheduler
            .register_handler(
                "work",
                Arc::new(FnHandler::new(move |payload: Value| {
                    let g = g.clone();
                    async move {
                        let now = g.current.fetch_add(1, Ordering::SeqCst) + 1;
                        g.peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        g.current.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, anyhow::Error>(payload)
                    }
                })),
            )
            .await;

        let ids: Vec<String> = (0..12).map(|i| format!("w{i}")).collect();
        for id in &ids {
            scheduler.submit(id.as_str(), "work", json!(id), None).await.unwrap();
        }
        let handle = scheduler.spawn();

        // Sample the running set while work drains.
        let sampler = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                let mut max_seen = 0;
                loop {
                    let status = scheduler.queue_status().await;
                    max_seen = max_seen.max(status.running);
                    if status.completed == 12 {
                        return max_seen;
                    }
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
            })
        };

        for id in &ids {
            let done = scheduler.wait_for(id).await.unwrap();
            assert_eq!(done.status, TaskStatus::Completed);
        }

        let max_seen = sampler.await.unwrap();
        assert!(max_seen <= LIMIT, "observed {max_seen} running tasks");
        assert!(gauge.peak.load(Ordering::SeqCst) <= LIMIT);
        assert!(gauge.peak.load(Ordering::SeqCst) >= 1);

        scheduler.stop();
        handle.await.unwrap();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn every_task_reaches_one_terminal_state() {
    timeout(TEST_TIMEOUT, async {
        let scheduler = scheduler(4);
        scheduler
            .register_handler(
                "maybe",
                Arc::new(FnHandler::new(|payload: Value| async move {
                    match payload.as_u64() {
                        Some(n) if n % 3 == 0 => Err(anyhow::anyhow!("divisible by three: {n}")),
                        _ => Ok(payload),
                    }
                })),
            )
            .await;

        let mut events = scheduler.subscribe();
        let handle = scheduler.spawn();
        for n in 0..20u64 {
            scheduler
                .submit(format!("n{n}"), "maybe", json!(n), None)
                .await
                .unwrap();
        }

        let mut terminal = std::collections::HashMap::new();
        while terminal.len() < 20 {
            match events.recv().await.unwrap() {
                TaskEvent::Completed { id } => {
                    assert!(terminal.insert(id, TaskStatus::Completed).is_none());
                }
                TaskEvent::Failed { id, .. } => {
                    assert!(terminal.insert(id, TaskStatus::Failed).is_none());
                }
                _ => {}
            }
        }

        for n in 0..20u64 {
            let id = format!("n{n}");
            let expected = if n % 3 == 0 {
                TaskStatus::Failed
            } else {
                TaskStatus::Completed
            };
            assert_eq!(terminal[&id], expected);
            assert_eq!(scheduler.status(&id).await, Some(expected));
        }

        let failed = scheduler.task("n3").await.unwrap();
        assert_eq!(failed.error.as_deref(), Some("divisible by three: 3"));

        let status = scheduler.queue_status().await;
        assert_eq!(status.completed, 20);
        assert_eq!(status.running, 0);
        assert_eq!(status.queued, 0);

        scheduler.stop();
        handle.await.unwrap();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn duplicate_submission_rejected_after_completion() {
    timeout(TEST_TIMEOUT, async {
        let scheduler = scheduler(1);
        let handle = scheduler.spawn();

        scheduler.submit("d1", "noop", json!(1), None).await.unwrap();
        scheduler.wait_for("d1").await.unwrap();

        let err = scheduler
            .submit("d1", "noop", json!(2), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Duplicate { .. }));

        scheduler.stop();
        handle.await.unwrap();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn blocking_run_returns_after_stop() {
    timeout(TEST_TIMEOUT, async {
        let scheduler = scheduler(2);
        let runner = scheduler.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        while !scheduler.is_active() {
            tokio::task::yield_now().await;
        }
        scheduler.submit("r1", "noop", json!(null), None).await.unwrap();
        scheduler.wait_for("r1").await.unwrap();

        scheduler.stop();
        handle.await.unwrap();
        assert!(!scheduler.is_active());
    })
    .await
    .expect("test timed out");
}
