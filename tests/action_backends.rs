// tests/action_backends.rs

use std::sync::{Arc, Mutex};

use dirwatch::config::WatcherConfig;
use dirwatch::engine::Controller;
use dirwatch::events::{Notification, NotificationHub};
use dirwatch::exec::{
    ActionSink, RealActionBackend, SinkConnector, SinkContent, SinkFuture, SinkRequest,
};
use dirwatch::fs::{FileSystem, RealFileSystem};
use dirwatch::types::{ChangeEvent, ChangeKind};
use dirwatch_test_utils::builders::{WatcherConfigBuilder, fast_options};
use dirwatch_test_utils::recorder::NotificationRecorder;
use dirwatch_test_utils::{init_tracing, with_timeout};
use tempfile::TempDir;

/// Files are written straight into the watch root; only deletions are
/// subscribed so the watcher itself never queues them.
const QUIET: &[ChangeKind] = &[ChangeKind::Deleted];

/// Records every request and answers with a fixed acknowledgement.
#[derive(Default)]
struct MemorySink {
    seen: Mutex<Vec<(SinkRequest, Option<SinkContent>)>>,
}

impl ActionSink for MemorySink {
    fn submit(&self, request: SinkRequest, content: Option<SinkContent>) -> SinkFuture {
        let ack = format!("stored {}", request.file_name);
        self.seen.lock().unwrap().push((request, content));
        Box::pin(async move { Ok(ack) })
    }
}

struct MemoryConnector(Arc<MemorySink>);

impl SinkConnector for MemoryConnector {
    fn connect(&self, endpoint: &str) -> anyhow::Result<Arc<dyn ActionSink>> {
        anyhow::ensure!(endpoint.starts_with("mem://"), "unsupported endpoint {endpoint}");
        Ok(self.0.clone())
    }
}

struct Setup {
    controller: Controller,
    recorder: NotificationRecorder,
    dir: TempDir,
}

async fn setup(
    connector: Option<Arc<dyn SinkConnector>>,
    daemon: impl FnOnce(&std::path::Path) -> WatcherConfig,
) -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let hub = NotificationHub::new();
    let backend = Arc::new(RealActionBackend::new(hub.notifier(), Arc::clone(&fs), connector));
    let controller = Controller::with_hub(hub, fast_options(), fs, backend);
    let recorder = NotificationRecorder::attach(&controller);
    controller.add(daemon(dir.path())).unwrap();
    assert_eq!(controller.start_all().await.unwrap(), 1);
    Setup {
        controller,
        recorder,
        dir,
    }
}

impl Setup {
    /// Create `name` on disk and queue a change for it.
    fn touch(&self, daemon: &str, name: &str, content: &str) -> ChangeEvent {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        let event = ChangeEvent::new(daemon, ChangeKind::Created, path);
        self.controller.submit(event.clone()).unwrap();
        event
    }

    async fn finish(&self) -> Vec<Notification> {
        with_timeout(self.controller.stop_all()).await.unwrap();
        self.controller.flush().await;
        self.recorder.all()
    }
}

#[cfg(unix)]
#[tokio::test]
async fn process_action_reports_start_output_and_exit_in_order() {
    init_tracing();
    let s = setup(None, |root| {
        WatcherConfigBuilder::new("echo", root)
            .events(QUIET)
            .process("sh", r#"-c "echo {name}; exit 3""#)
            .process_options(|p| {
                p.redirect_stdout = true;
                p.wait_for_exit = true;
            })
            .build()
    })
    .await;

    let event = s.touch("echo", "report.csv", "x");
    let all = s.finish().await;

    let process: Vec<&Notification> = all
        .iter()
        .filter(|n| {
            matches!(
                n,
                Notification::ProcessStarted { .. }
                    | Notification::ProcessOutput { .. }
                    | Notification::ProcessExited { .. }
            )
        })
        .collect();
    match &process[..] {
        [
            Notification::ProcessStarted { id, command_line, .. },
            Notification::ProcessOutput { line, .. },
            Notification::ProcessExited { exit_code, .. },
        ] => {
            assert_eq!(*id, event.id);
            assert!(command_line.starts_with("sh -c"));
            assert_eq!(line, "report.csv");
            assert_eq!(*exit_code, Some(3));
        }
        other => panic!("unexpected process notifications: {other:?}"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn missing_program_surfaces_a_process_error() {
    use dirwatch::types::ProcessErrorKind;

    init_tracing();
    let s = setup(None, |root| {
        WatcherConfigBuilder::new("ghost", root)
            .events(QUIET)
            .process("/definitely/not/a/program", "{file}")
            .build()
    })
    .await;

    let event = s.touch("ghost", "a.txt", "x");
    let all = s.finish().await;

    let errors: Vec<_> = all
        .iter()
        .filter_map(|n| match n {
            Notification::ProcessError { id, kind, .. } => Some((*id, *kind)),
            _ => None,
        })
        .collect();
    assert_eq!(errors, vec![(event.id, ProcessErrorKind::FileNotFound)]);
}

#[tokio::test]
async fn sink_action_streams_content_and_reports_the_response() {
    init_tracing();
    let sink = Arc::new(MemorySink::default());
    let connector: Arc<dyn SinkConnector> = Arc::new(MemoryConnector(Arc::clone(&sink)));
    let s = setup(Some(connector), |root| {
        WatcherConfigBuilder::new("ship", root)
            .events(QUIET)
            .sink("mem://archive", true)
            .build()
    })
    .await;

    let event = s.touch("ship", "data.bin", "hello");
    let all = s.finish().await;

    let seen = sink.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (request, content) = &seen[0];
    assert_eq!(request.id, event.id);
    assert_eq!(request.daemon, "ship");
    assert_eq!(request.file_name, "data.bin");
    let content = content.as_ref().expect("content is streamed");
    assert_eq!(content.bytes, b"hello");
    assert_eq!(request.content_hash.as_deref(), Some(content.hash.as_str()));

    assert!(all.iter().any(|n| matches!(
        n,
        Notification::ServiceResponse { message, .. } if message == "stored data.bin"
    )));
}

#[tokio::test]
async fn sink_without_transport_reports_a_service_error() {
    init_tracing();
    let s = setup(None, |root| {
        WatcherConfigBuilder::new("nowhere", root)
            .events(QUIET)
            .sink("tcp://collector:9000", false)
            .build()
    })
    .await;

    s.touch("nowhere", "x.txt", "x");
    let all = s.finish().await;

    assert_eq!(
        all.iter()
            .filter(|n| matches!(n, Notification::ServiceError { .. }))
            .count(),
        1
    );
    assert_eq!(s.controller.outstanding(), 0);
}
