//! Integration tests for Workgate
//!
//! These tests drive the scheduler through its public surface only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use workgate::{Priority, Scheduler, SchedulerConfig, SubmitError};

fn scheduler(config: SchedulerConfig) -> Scheduler {
    Scheduler::new(config).expect("valid config")
}

/// Poll `check` until it holds or a second passes
async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// =============================================================================
// Concurrency gate
// =============================================================================

#[tokio::test]
async fn test_third_task_waits_for_a_free_slot() {
    let scheduler = scheduler(SchedulerConfig {
        max_concurrent: 2,
        ..Default::default()
    });

    let (release_first, first_gate) = oneshot::channel::<()>();
    let first = scheduler.submit(move || async move {
        first_gate.await.ok();
        Ok::<_, ()>("first")
    });
    let second = scheduler.submit(|| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok::<_, ()>("second")
    });
    let third_started = Arc::new(AtomicUsize::new(0));
    let third = scheduler.submit({
        let third_started = third_started.clone();
        move || async move {
            third_started.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>("third")
        }
    });

    let stats = scheduler.stats();
    assert_eq!(stats.running, 2);
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.max_concurrent, 2);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(third_started.load(Ordering::SeqCst), 0, "third ran before a slot freed");

    release_first.send(()).unwrap();
    assert_eq!(first.await.unwrap(), "first");
    assert_eq!(third.await.unwrap(), "third");
    assert_eq!(third_started.load(Ordering::SeqCst), 1);
    assert_eq!(second.await.unwrap(), "second");

    assert_eq!(scheduler.stats().queued, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_running_never_exceeds_ceiling() {
    let scheduler = scheduler(SchedulerConfig {
        max_concurrent: 3,
        ..Default::default()
    });
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..40u64)
        .map(|i| {
            let active = active.clone();
            let peak = peak.clone();
            let priority = Priority::ALL[(i % 4) as usize];
            scheduler.submit_with_priority(
                move || async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1 + i % 5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ()>(i)
                },
                priority,
            )
        })
        .collect();

    let mut observed_running = 0;
    for handle in handles {
        observed_running = observed_running.max(scheduler.stats().running);
        handle.await.unwrap();
    }
    scheduler.wait_idle().await;

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(observed_running <= 3);
    assert!(scheduler.metrics().peak_concurrent <= 3);
    let stats = scheduler.stats();
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.running, 0);
}

// =============================================================================
// Queue ordering
// =============================================================================

/// Occupy the single slot, queue `pending`, then release and report the
/// order in which the queued task bodies started.
async fn start_order_behind_blocker(pending: &[(Priority, &'static str)]) -> Vec<&'static str> {
    let scheduler = scheduler(SchedulerConfig {
        max_concurrent: 1,
        ..Default::default()
    });
    let (release, gate) = oneshot::channel::<()>();
    let blocker = scheduler.submit(move || async move { gate.await.map_err(|_| ()) });

    let order = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<_> = pending
        .iter()
        .map(|&(priority, name)| {
            let order = order.clone();
            scheduler.submit_with_priority(
                move || async move {
                    order.lock().unwrap().push(name);
                    Ok::<_, ()>(())
                },
                priority,
            )
        })
        .collect();

    release.send(()).unwrap();
    blocker.await.unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    let order = order.lock().unwrap().clone();
    order
}

#[tokio::test]
async fn test_high_priority_overtakes_earlier_low() {
    let order = start_order_behind_blocker(&[(Priority::Low, "low"), (Priority::High, "high")]).await;
    assert_eq!(order, vec!["high", "low"]);
}

#[tokio::test]
async fn test_equal_priority_is_fifo() {
    let order = start_order_behind_blocker(&[
        (Priority::Normal, "a"),
        (Priority::Normal, "b"),
        (Priority::Normal, "c"),
    ])
    .await;
    assert_eq!(order, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_mixed_priorities_order() {
    let order = start_order_behind_blocker(&[
        (Priority::Low, "low-1"),
        (Priority::Critical, "critical"),
        (Priority::Normal, "normal-1"),
        (Priority::High, "high"),
        (Priority::Normal, "normal-2"),
        (Priority::Low, "low-2"),
    ])
    .await;
    assert_eq!(
        order,
        vec!["critical", "high", "normal-1", "normal-2", "low-1", "low-2"]
    );
}

#[tokio::test]
async fn test_default_priority_comes_from_config() {
    let scheduler = scheduler(SchedulerConfig {
        default_priority: Priority::High,
        ..Default::default()
    });
    let handle = scheduler.submit(|| async { Ok::<_, ()>(()) });
    assert_eq!(handle.priority(), Priority::High);
    handle.await.unwrap();
}

// =============================================================================
// Rate limiting
// =============================================================================

#[tokio::test]
async fn test_rate_window_rejects_then_recovers() {
    let scheduler = scheduler(SchedulerConfig {
        max_requests_per_window: 3,
        rate_window_ms: 1000,
        ..Default::default()
    });

    for i in 0..3 {
        assert_eq!(scheduler.submit(move || async move { Ok::<_, ()>(i) }).await.unwrap(), i);
    }
    assert_eq!(scheduler.stats().rate_limit_remaining, 0);

    let err = scheduler.submit(|| async { Ok::<_, ()>(99) }).await.unwrap_err();
    assert!(err.is_rate_limited());
    let retry_after = err.retry_after().unwrap();
    assert!(retry_after > Duration::ZERO && retry_after <= Duration::from_millis(1000));
    assert_eq!(scheduler.stats().queued, 0, "rejected task must not be queued");

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(scheduler.stats().rate_limit_remaining, 3);
    assert_eq!(scheduler.submit(|| async { Ok::<_, ()>(5) }).await.unwrap(), 5);
}

#[tokio::test]
async fn test_rate_window_counts_admissions_not_submissions() {
    let scheduler = scheduler(SchedulerConfig {
        max_concurrent: 1,
        max_requests_per_window: 2,
        ..Default::default()
    });

    let (release, gate) = oneshot::channel::<()>();
    let blocker = scheduler.submit(move || async move { gate.await.map_err(|_| ()) });
    // Only the blocker has been admitted, so queued work is still accepted
    let queued: Vec<_> = (0..3).map(|_| scheduler.submit(|| async { Ok::<_, ()>(()) })).collect();
    assert!(queued.iter().all(|h| !h.is_rejected()));
    assert_eq!(scheduler.stats().queued, 3);

    release.send(()).unwrap();
    blocker.await.unwrap();
    for handle in queued {
        handle.await.unwrap();
    }

    // Four admissions now sit in the window
    assert!(scheduler.submit(|| async { Ok::<_, ()>(()) }).await.unwrap_err().is_rate_limited());
    assert_eq!(scheduler.metrics().total_admitted, 4);
}

// =============================================================================
// Clear and shutdown
// =============================================================================

#[tokio::test]
async fn test_clear_rejects_pending_and_spares_running() {
    let scheduler = scheduler(SchedulerConfig {
        max_concurrent: 1,
        ..Default::default()
    });

    let running = scheduler.submit(|| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok::<_, ()>("done")
    });
    let pending = scheduler.submit(|| async { Ok::<_, ()>("never") });

    assert_eq!(scheduler.clear(), 1);
    assert!(matches!(pending.await, Err(SubmitError::QueueCleared)));
    assert_eq!(running.await.unwrap(), "done");

    eventually(|| scheduler.stats().running == 0).await;
    assert_eq!(scheduler.metrics().total_cleared, 1);
}

#[tokio::test]
async fn test_clear_on_empty_queue_is_noop() {
    let scheduler = scheduler(SchedulerConfig::default());
    assert_eq!(scheduler.clear(), 0);
    scheduler.wait_idle().await;
}

#[tokio::test]
async fn test_task_errors_reach_the_submitter_unchanged() {
    #[derive(Debug, PartialEq)]
    enum HandlerError {
        Unauthorized { realm: String },
    }

    let scheduler = scheduler(SchedulerConfig::default());
    let err = scheduler
        .submit(|| async {
            Err::<(), _>(HandlerError::Unauthorized {
                realm: "plugins".to_string(),
            })
        })
        .await
        .unwrap_err();

    assert_eq!(
        err.into_task_error(),
        Some(HandlerError::Unauthorized {
            realm: "plugins".to_string()
        })
    );
}

#[tokio::test]
async fn test_handles_are_shared_across_clones() {
    let scheduler = scheduler(SchedulerConfig {
        max_concurrent: 1,
        ..Default::default()
    });
    let other = scheduler.clone();

    let (release, gate) = oneshot::channel::<()>();
    let blocker = scheduler.submit(move || async move { gate.await.map_err(|_| ()) });
    let pending = other.submit(|| async { Ok::<_, ()>(()) });

    assert_eq!(scheduler.stats().queued, 1);
    assert_eq!(other.clear(), 1);
    assert!(pending.await.unwrap_err().is_cleared());

    release.send(()).unwrap();
    blocker.await.unwrap();
    other.shutdown().await;
    assert_eq!(scheduler.stats().running, 0);
    assert!(scheduler.is_closed());
    assert!(scheduler.submit(|| async { Ok::<_, ()>(()) }).await.unwrap_err().is_cleared());
}

// =============================================================================
// CLI
// =============================================================================

mod cli {
    use assert_cmd::Command;
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn wg(home: &TempDir) -> Command {
        let mut cmd = Command::cargo_bin("wg").unwrap();
        cmd.current_dir(home.path())
            .env("HOME", home.path())
            .env("XDG_DATA_HOME", home.path().join("data"))
            .env("XDG_CONFIG_HOME", home.path().join("config"));
        cmd
    }

    #[test]
    fn test_config_prints_defaults() {
        let home = TempDir::new().unwrap();
        wg(&home)
            .arg("config")
            .assert()
            .success()
            .stdout(predicate::str::contains("max-concurrent: 5"))
            .stdout(predicate::str::contains("rate-window-ms: 60000"));
    }

    #[test]
    fn test_config_reads_local_file() {
        let home = TempDir::new().unwrap();
        std::fs::write(home.path().join(".workgate.yml"), "scheduler:\n  max-concurrent: 9\n").unwrap();
        wg(&home)
            .args(["config", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"max-concurrent\": 9"));
    }

    #[test]
    fn test_simulate_json_report() {
        let home = TempDir::new().unwrap();
        let output = wg(&home)
            .args([
                "simulate",
                "--tasks",
                "6",
                "--min-ms",
                "1",
                "--max-ms",
                "3",
                "--max-requests",
                "4",
                "--format",
                "json",
            ])
            .output()
            .unwrap();
        assert!(output.status.success());

        let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["tasks"], 6);
        assert_eq!(report["outcomes"]["completed"], 4);
        assert_eq!(report["outcomes"]["rate_limited"], 2);
    }

    #[test]
    fn test_simulate_rejects_invalid_override() {
        let home = TempDir::new().unwrap();
        wg(&home)
            .args(["simulate", "--max-concurrent", "0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid scheduler configuration"));
    }
}
