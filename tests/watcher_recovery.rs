// tests/watcher_recovery.rs

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use dirwatch::config::WatcherConfig;
use dirwatch::engine::Controller;
use dirwatch::events::Notification;
use dirwatch::fs::RealFileSystem;
use dirwatch::types::{ChangeKind, RecycleReason, WatcherState};
use dirwatch_test_utils::builders::{WatcherConfigBuilder, fast_options};
use dirwatch_test_utils::fake_backend::FakeBackend;
use dirwatch_test_utils::recorder::NotificationRecorder;
use dirwatch_test_utils::{eventually, init_tracing};

use common::Harness;

const SETTLE: Duration = Duration::from_secs(5);

/// Controller on the real filesystem, watching a fresh temp dir.
struct RealSetup {
    controller: Controller,
    backend: FakeBackend,
    recorder: NotificationRecorder,
    root: PathBuf,
    _dir: TempDir,
}

fn real_setup(daemon: impl FnOnce(&Path) -> WatcherConfig) -> RealSetup {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let backend = FakeBackend::new();
    let controller = Controller::new(
        fast_options(),
        Arc::new(RealFileSystem),
        Arc::new(backend.clone()),
    );
    let recorder = NotificationRecorder::attach(&controller);
    controller.add(daemon(&root)).unwrap();
    RealSetup {
        controller,
        backend,
        recorder,
        root,
        _dir: dir,
    }
}

#[tokio::test]
async fn startup_scan_reports_existing_matching_files() {
    init_tracing();
    let setup = real_setup(|root| {
        std::fs::write(root.join("a.csv"), "a").unwrap();
        std::fs::write(root.join("b.csv"), "b").unwrap();
        std::fs::write(root.join("notes.txt"), "skip").unwrap();
        WatcherConfigBuilder::new("scan", root)
            .filter("*.csv")
            .startup_scan()
            .build()
    });

    assert_eq!(setup.controller.start_all().await.unwrap(), 1);
    assert!(
        eventually(SETTLE, || setup.controller.state("scan") == Some(WatcherState::Running))
            .await
    );
    assert!(eventually(SETTLE, || setup.backend.call_count() == 2).await);

    let mut paths: Vec<PathBuf> = setup
        .backend
        .calls()
        .into_iter()
        .inspect(|e| assert_eq!(e.kind, ChangeKind::SystemGenerated))
        .map(|e| e.path)
        .collect();
    paths.sort();
    assert_eq!(paths, vec![setup.root.join("a.csv"), setup.root.join("b.csv")]);

    setup.controller.flush().await;
    let states: Vec<WatcherState> = setup
        .recorder
        .all()
        .into_iter()
        .filter_map(|n| match n {
            Notification::WatcherStateChanged { state, .. } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(states, vec![WatcherState::Starting, WatcherState::Running]);

    setup.controller.stop_all().await.unwrap();
}

#[tokio::test]
async fn created_file_is_detected_and_dispatched() {
    init_tracing();
    let setup = real_setup(|root| {
        WatcherConfigBuilder::new("live", root)
            .filter("*.csv")
            .events(&[ChangeKind::Created])
            .build()
    });
    assert_eq!(setup.controller.start_all().await.unwrap(), 1);

    let target = setup.root.join("fresh.csv");
    std::fs::write(&target, "data").unwrap();
    std::fs::write(setup.root.join("ignored.tmp"), "data").unwrap();

    assert!(
        eventually(SETTLE, || setup
            .backend
            .calls()
            .iter()
            .any(|e| e.path == target && e.kind == ChangeKind::Created))
        .await
    );
    assert!(setup.backend.calls().iter().all(|e| e.path == target));

    setup.controller.stop_all().await.unwrap();
}

#[tokio::test]
async fn deleted_root_is_recycled_once_it_comes_back() {
    init_tracing();
    let setup = real_setup(|root| {
        let watched = root.join("inbox");
        std::fs::create_dir(&watched).unwrap();
        WatcherConfigBuilder::new("phoenix", watched)
            .recovery(|r| {
                r.tick = "50ms".into();
                r.recycle = true;
            })
            .build()
    });
    assert_eq!(setup.controller.start_all().await.unwrap(), 1);

    let watched = setup.root.join("inbox");
    std::fs::remove_dir(&watched).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        setup
            .recorder
            .count(|n| matches!(n, Notification::Recycled { .. })),
        0
    );

    std::fs::create_dir(&watched).unwrap();
    assert!(
        setup
            .recorder
            .wait_for(SETTLE, |n| matches!(
                n,
                Notification::Recycled {
                    reason: RecycleReason::DirectoryNotFound,
                    ..
                }
            ))
            .await
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    setup.controller.flush().await;
    assert_eq!(
        setup
            .recorder
            .count(|n| matches!(n, Notification::Recycled { .. })),
        1
    );

    // The fresh handle sees new files.
    let after = watched.join("after.txt");
    std::fs::write(&after, "x").unwrap();
    assert!(eventually(SETTLE, || setup.backend.calls().iter().any(|e| e.path == after)).await);

    setup.controller.stop_all().await.unwrap();
}

#[tokio::test]
async fn interval_recycling_replaces_the_handle_periodically() {
    init_tracing();
    let setup = real_setup(|root| {
        WatcherConfigBuilder::new("periodic", root)
            .recovery(|r| {
                r.tick = "20ms".into();
                r.recycle_interval = Some("60ms".into());
            })
            .build()
    });
    assert_eq!(setup.controller.start_all().await.unwrap(), 1);

    assert!(
        setup
            .recorder
            .wait_for(SETTLE, |n| matches!(
                n,
                Notification::Recycled {
                    reason: RecycleReason::Recycle,
                    ..
                }
            ))
            .await
    );
    setup.controller.stop_all().await.unwrap();
}

#[tokio::test]
async fn poll_scan_picks_up_changes_the_os_never_reported() {
    init_tracing();
    // The OS watch runs on an empty real directory; the file only exists in
    // the mock, so only the poll can find it.
    let h = Harness::started(fast_options(), FakeBackend::new(), |root| {
        vec![
            WatcherConfigBuilder::new("poller", root)
                .dedup_window("10s")
                .recovery(|r| {
                    r.tick = "30ms".into();
                    r.poll = true;
                    r.poll_ticks = 1;
                })
                .build(),
        ]
    })
    .await;

    let missed = h.file("missed.csv");
    assert!(eventually(SETTLE, || h.backend.call_count() == 1).await);
    let event = h.backend.calls().remove(0);
    assert_eq!(event.path, missed);
    assert_eq!(event.kind, ChangeKind::Created);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.backend.call_count(), 1, "a polled file is reported once");

    h.controller.stop_all().await.unwrap();
}

#[tokio::test]
async fn failed_poll_scan_is_reported_and_retried() {
    init_tracing();
    let h = Harness::started(fast_options(), FakeBackend::new(), |root| {
        vec![
            WatcherConfigBuilder::new("poller", root)
                .recursive()
                .recovery(|r| {
                    r.tick = "30ms".into();
                    r.poll = true;
                    r.poll_ticks = 1;
                })
                .build(),
        ]
    })
    .await;

    let locked_dir = h.root.path().join("restricted");
    h.fs.add_dir(&locked_dir);
    h.fs.make_unreadable(&locked_dir);

    assert!(
        h.recorder
            .wait_for(SETTLE, |n| matches!(
                n,
                Notification::SearchError { directory, .. } if *directory == locked_dir
            ))
            .await
    );
    h.controller.stop_all().await.unwrap();
}
