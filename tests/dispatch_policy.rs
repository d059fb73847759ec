// tests/dispatch_policy.rs

mod common;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use dirwatch::config::ControllerOptions;
use dirwatch::engine::temp_path;
use dirwatch::events::Notification;
use dirwatch::exec::ActionError;
use dirwatch::fs::FileSystem;
use dirwatch::types::{CancelReason, ProcessErrorKind};
use dirwatch_test_utils::builders::{WatcherConfigBuilder, fast_options};
use dirwatch_test_utils::fake_backend::FakeBackend;
use dirwatch_test_utils::{eventually, init_tracing};

use common::Harness;

const SETTLE: Duration = Duration::from_secs(5);

#[tokio::test]
async fn batch_size_caps_concurrent_actions_per_daemon() {
    init_tracing();
    let backend = FakeBackend::new().with_work(Duration::from_millis(40));
    let h = Harness::started(fast_options(), backend, |root| {
        vec![WatcherConfigBuilder::new("batch", root).batch_size(2).build()]
    })
    .await;

    for i in 0..5 {
        let path = h.file(&format!("f{i}.txt"));
        h.submit("batch", path);
    }

    assert!(eventually(SETTLE, || h.backend.finished() == 5).await);
    assert_eq!(h.backend.peak_concurrency_for("batch"), 2);

    h.controller.stop_all().await.unwrap();
    assert_eq!(h.controller.outstanding(), 0);
}

#[tokio::test]
async fn tasks_are_dispatched_in_arrival_order() {
    init_tracing();
    let h = Harness::started(fast_options(), FakeBackend::new(), |root| {
        vec![WatcherConfigBuilder::new("fifo", root).batch_size(1).build()]
    })
    .await;

    let paths: Vec<PathBuf> = (0..4).map(|i| h.file(&format!("{i}.dat"))).collect();
    for path in &paths {
        h.submit("fifo", path.clone());
    }

    assert!(eventually(SETTLE, || h.backend.finished() == 4).await);
    let dispatched: Vec<PathBuf> = h.backend.calls().into_iter().map(|e| e.path).collect();
    assert_eq!(dispatched, paths);
}

#[tokio::test]
async fn delayed_task_waits_for_its_due_time() {
    init_tracing();
    let h = Harness::started(fast_options(), FakeBackend::new(), |root| {
        vec![
            WatcherConfigBuilder::new("slow", root)
                .policy(|p| p.delay = "200ms".into())
                .build(),
        ]
    })
    .await;

    let event = h.submit("slow", h.file("late.csv"));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(h.backend.call_count(), 0, "dispatched before the delay elapsed");

    assert!(eventually(SETTLE, || h.backend.call_count() == 1).await);
    let dispatched = h.backend.calls().remove(0);
    assert_eq!(dispatched.id, event.id);
    assert!(event.timestamp.elapsed().unwrap() >= Duration::from_millis(200));
}

#[tokio::test]
async fn missing_file_is_cancelled_when_it_must_exist() {
    init_tracing();
    let h = Harness::started(fast_options(), FakeBackend::new(), |root| {
        vec![WatcherConfigBuilder::new("strict", root).must_exist().build()]
    })
    .await;

    let gone = h.missing("gone.txt");
    h.submit("strict", gone.clone());
    let present = h.file("here.txt");
    h.submit("strict", present.clone());

    assert!(eventually(SETTLE, || h.backend.finished() == 1).await);
    h.controller.flush().await;

    assert_eq!(h.recorder.cancellations(), vec![(gone, CancelReason::FileMissing)]);
    assert_eq!(h.backend.calls()[0].path, present);
}

#[tokio::test]
async fn locked_file_is_retried_then_cancelled() {
    init_tracing();
    let h = Harness::started(fast_options(), FakeBackend::new(), |root| {
        vec![
            WatcherConfigBuilder::new("locks", root)
                .policy(|p| {
                    p.lock_check = true;
                    p.max_lock_retries = 3;
                })
                .build(),
        ]
    })
    .await;

    let path = h.file("busy.bin");
    h.fs.lock(&path);
    h.submit("locks", path.clone());

    assert!(
        h.recorder
            .wait_for(SETTLE, |n| matches!(n, Notification::TaskCanceled { .. }))
            .await
    );
    assert_eq!(h.fs.lock_checks(&path), 4);
    assert_eq!(h.recorder.cancellations(), vec![(path, CancelReason::LockTestFailed)]);
    assert_eq!(h.backend.call_count(), 0);
    assert!(eventually(SETTLE, || h.controller.outstanding() == 0).await);
}

#[tokio::test]
async fn lock_that_clears_lets_the_task_run() {
    init_tracing();
    let h = Harness::started(fast_options(), FakeBackend::new(), |root| {
        vec![
            WatcherConfigBuilder::new("locks", root)
                .policy(|p| p.lock_check = true)
                .build(),
        ]
    })
    .await;

    let path = h.file("upload.zip");
    h.fs.lock(&path);
    h.submit("locks", path.clone());

    assert!(eventually(SETTLE, || h.fs.lock_checks(&path) >= 3).await);
    assert_eq!(h.backend.call_count(), 0);

    h.fs.unlock(&path);
    assert!(eventually(SETTLE, || h.backend.call_count() == 1).await);
    assert!(h.recorder.cancellations().is_empty());
}

#[tokio::test]
async fn full_queue_cancels_locked_task_early() {
    init_tracing();
    let options = ControllerOptions {
        queue_limit: 1,
        ..fast_options()
    };
    let h = Harness::started(options, FakeBackend::new(), |root| {
        vec![
            WatcherConfigBuilder::new("locks", root)
                .policy(|p| p.lock_check = true)
                .build(),
        ]
    })
    .await;

    let a = h.file("a.bin");
    let b = h.file("b.bin");
    h.fs.lock(&a);
    h.fs.lock(&b);
    h.submit("locks", a);
    h.submit("locks", b);

    // With one slot in the queue, at most one locked task can wait.
    assert!(
        h.recorder
            .wait_for(SETTLE, |n| matches!(
                n,
                Notification::TaskCanceled {
                    reason: CancelReason::LockTestFailed,
                    ..
                }
            ))
            .await
    );
    assert_eq!(h.backend.call_count(), 0);
}

#[tokio::test]
async fn rename_before_run_dispatches_the_renamed_path() {
    init_tracing();
    let h = Harness::started(fast_options(), FakeBackend::new(), |root| {
        vec![
            WatcherConfigBuilder::new("claim", root)
                .policy(|p| p.rename_before_run = true)
                .build(),
        ]
    })
    .await;

    let path = h.file("claim.csv");
    h.fs.fail_renames(&path, vec![io::ErrorKind::PermissionDenied]);
    let event = h.submit("claim", path.clone());

    assert!(eventually(SETTLE, || h.backend.call_count() == 1).await);
    let dispatched = h.backend.calls().remove(0);
    assert_eq!(dispatched.id, event.id);
    assert_eq!(dispatched.path, temp_path(&event));
    assert_eq!(h.fs.rename_attempts(&path), 2);
    assert!(!h.fs.is_file(&path));
    assert!(h.fs.is_file(&dispatched.path));
}

#[tokio::test]
async fn rename_gives_up_after_its_retries() {
    init_tracing();
    let h = Harness::started(fast_options(), FakeBackend::new(), |root| {
        vec![
            WatcherConfigBuilder::new("claim", root)
                .policy(|p| {
                    p.rename_before_run = true;
                    p.max_rename_retries = 2;
                })
                .build(),
        ]
    })
    .await;

    let path = h.file("stuck.csv");
    h.fs.fail_renames(&path, vec![io::ErrorKind::PermissionDenied; 5]);
    h.submit("claim", path.clone());

    assert!(
        h.recorder
            .wait_for(SETTLE, |n| matches!(n, Notification::TaskCanceled { .. }))
            .await
    );
    assert_eq!(h.fs.rename_attempts(&path), 3);
    assert_eq!(h.recorder.cancellations(), vec![(path, CancelReason::RenameFailed)]);
    assert_eq!(h.backend.call_count(), 0);
}

#[tokio::test]
async fn synchronized_execution_runs_one_action_at_a_time() {
    init_tracing();
    let options = ControllerOptions {
        synchronized_execution: true,
        ..fast_options()
    };
    let backend = FakeBackend::new().with_work(Duration::from_millis(20));
    let h = Harness::started(options, backend, |root| {
        vec![
            WatcherConfigBuilder::new("left", root).build(),
            WatcherConfigBuilder::new("right", root).build(),
        ]
    })
    .await;

    for i in 0..3 {
        h.submit("left", h.file(&format!("l{i}")));
        h.submit("right", h.file(&format!("r{i}")));
    }

    assert!(eventually(SETTLE, || h.backend.finished() == 6).await);
    assert_eq!(h.backend.peak_concurrency(), 1);
}

#[tokio::test]
async fn action_failures_are_reported_and_counters_settle() {
    init_tracing();
    let backend = FakeBackend::new().failing(ActionError::Process {
        kind: ProcessErrorKind::FileNotFound,
        message: "no such program".into(),
    });
    let h = Harness::started(fast_options(), backend, |root| {
        vec![WatcherConfigBuilder::new("broken", root).build()]
    })
    .await;

    let path = h.file("x.txt");
    h.submit("broken", path.clone());

    assert!(
        h.recorder
            .wait_for(SETTLE, |n| matches!(n, Notification::ProcessError { .. }))
            .await
    );
    let errors: Vec<Notification> = h
        .recorder
        .all()
        .into_iter()
        .filter(|n| matches!(n, Notification::ProcessError { .. }))
        .collect();
    match &errors[..] {
        [Notification::ProcessError { path: p, kind, .. }] => {
            assert_eq!(p, &path);
            assert_eq!(*kind, ProcessErrorKind::FileNotFound);
        }
        other => panic!("expected a single process error, got {other:?}"),
    }
    assert!(eventually(SETTLE, || h.controller.outstanding() == 0).await);
    assert_eq!(h.controller.in_flight(), 0);
}
