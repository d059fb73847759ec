use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use serde::Deserialize;

/// Canonical daemon name type used throughout the engine.
pub type DaemonName = String;

/// Unique identifier of a [`ChangeEvent`].
///
/// Retry bookkeeping in the dispatch queue is keyed by this id, so it is
/// preserved when the rename-before-run step swaps in a new path.
pub type EventId = u64;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

fn next_event_id() -> EventId {
    NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Kind of file-system change a [`ChangeEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Changed,
    Deleted,
    Renamed,
    /// Synthesized by a startup scan rather than reported by the OS.
    #[serde(rename = "system")]
    SystemGenerated,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "Created",
            ChangeKind::Changed => "Changed",
            ChangeKind::Deleted => "Deleted",
            ChangeKind::Renamed => "Renamed",
            ChangeKind::SystemGenerated => "SystemGenerated",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "created" => Ok(ChangeKind::Created),
            "changed" => Ok(ChangeKind::Changed),
            "deleted" => Ok(ChangeKind::Deleted),
            "renamed" => Ok(ChangeKind::Renamed),
            "system" | "systemgenerated" => Ok(ChangeKind::SystemGenerated),
            other => Err(format!(
                "invalid change kind: {other} (expected created, changed, deleted or renamed)"
            )),
        }
    }
}

/// A single qualifying change, produced by a watcher and consumed by the
/// dispatch pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub id: EventId,
    pub daemon: DaemonName,
    pub kind: ChangeKind,
    pub path: PathBuf,
    /// Previous full path; only set for [`ChangeKind::Renamed`].
    pub old_path: Option<PathBuf>,
    pub timestamp: SystemTime,
}

impl ChangeEvent {
    pub fn new(daemon: impl Into<DaemonName>, kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            id: next_event_id(),
            daemon: daemon.into(),
            kind,
            path: path.into(),
            old_path: None,
            timestamp: SystemTime::now(),
        }
    }

    pub fn renamed(
        daemon: impl Into<DaemonName>,
        old_path: impl Into<PathBuf>,
        path: impl Into<PathBuf>,
    ) -> Self {
        let mut event = Self::new(daemon, ChangeKind::Renamed, path);
        event.old_path = Some(old_path.into());
        event
    }

    /// Copy of this event pointing at `path`, keeping id, kind and timestamp.
    pub fn with_path(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }

    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Observable lifecycle state of one watcher.
///
/// "Stopping" is a controller-wide condition and is not represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatcherState {
    #[default]
    Stopped,
    Starting,
    Running,
}

impl WatcherState {
    pub fn is_active(&self) -> bool {
        !matches!(self, WatcherState::Stopped)
    }
}

/// Why a watcher tore down and recreated its OS watch handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecycleReason {
    DirectoryNotFound,
    Error,
    Recycle,
}

/// Why a queued task was dropped without being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    FileMissing,
    LockTestFailed,
    RenameFailed,
    /// Queue discarded by a stop that does not run queued work.
    Discarded,
}

impl CancelReason {
    /// Stable machine-checkable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            CancelReason::FileMissing => "file_missing",
            CancelReason::LockTestFailed => "file_lock_test_failed",
            CancelReason::RenameFailed => "rename_failed",
            CancelReason::Discarded => "discarded",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CancelReason::FileMissing => "file missing",
            CancelReason::LockTestFailed => "file lock test failed",
            CancelReason::RenameFailed => "rename failed",
            CancelReason::Discarded => "queue discarded",
        };
        f.write_str(text)
    }
}

/// Category of a process-launch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessErrorKind {
    FileNotFound,
    AccessDenied,
    BadCredentials,
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_are_unique_and_survive_path_swap() {
        let a = ChangeEvent::new("d", ChangeKind::Created, "/tmp/a");
        let b = ChangeEvent::new("d", ChangeKind::Created, "/tmp/a");
        assert_ne!(a.id, b.id);

        let moved = a.with_path("/tmp/a.1.tmp");
        assert_eq!(moved.id, a.id);
        assert_eq!(moved.kind, ChangeKind::Created);
        assert_eq!(moved.path, PathBuf::from("/tmp/a.1.tmp"));
    }

    #[test]
    fn change_kind_parses_case_insensitively() {
        assert_eq!("Renamed".parse::<ChangeKind>(), Ok(ChangeKind::Renamed));
        assert!("moved".parse::<ChangeKind>().is_err());
    }
}
