#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use dirwatch::config::{ControllerOptions, WatcherConfig};
use dirwatch::engine::Controller;
use dirwatch::fs::MockFileSystem;
use dirwatch::types::{ChangeEvent, ChangeKind};
use dirwatch_test_utils::fake_backend::FakeBackend;
use dirwatch_test_utils::recorder::NotificationRecorder;

/// A controller wired to an in-memory filesystem and a fake backend.
///
/// The watch root is a real temporary directory (the OS watch needs one)
/// that is also registered with the mock, so dispatch-policy checks run
/// against the mock while nothing ever touches the real directory.
pub struct Harness {
    pub controller: Controller,
    pub fs: MockFileSystem,
    pub backend: FakeBackend,
    pub recorder: NotificationRecorder,
    pub root: TempDir,
}

impl Harness {
    pub fn new(
        options: ControllerOptions,
        backend: FakeBackend,
        daemons: impl FnOnce(&Path) -> Vec<WatcherConfig>,
    ) -> Self {
        let root = tempfile::tempdir().expect("create temp dir");
        let fs = MockFileSystem::new();
        fs.add_dir(root.path());

        let controller = Controller::new(options, Arc::new(fs.clone()), Arc::new(backend.clone()));
        let recorder = NotificationRecorder::attach(&controller);
        for daemon in daemons(root.path()) {
            controller.add(daemon).expect("add daemon");
        }

        Self {
            controller,
            fs,
            backend,
            recorder,
            root,
        }
    }

    /// Build and start every daemon.
    pub async fn started(
        options: ControllerOptions,
        backend: FakeBackend,
        daemons: impl FnOnce(&Path) -> Vec<WatcherConfig>,
    ) -> Self {
        let harness = Self::new(options, backend, daemons);
        let configured = harness.controller.list().len();
        let started = harness.controller.start_all().await.expect("start_all");
        assert_eq!(started, configured, "every daemon should start");
        harness
    }

    /// Path under the watch root, registered as a file in the mock.
    pub fn file(&self, name: &str) -> PathBuf {
        let path = self.root.path().join(name);
        self.fs.add_file(&path, b"payload".to_vec());
        path
    }

    /// Path under the watch root that the mock does not know about.
    pub fn missing(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    pub fn submit(&self, daemon: &str, path: PathBuf) -> ChangeEvent {
        let event = ChangeEvent::new(daemon, ChangeKind::Created, path);
        self.controller
            .submit(event.clone())
            .expect("controller accepts the change");
        event
    }
}
