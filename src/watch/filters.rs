// src/watch/filters.rs

//! Turning raw `notify` events into candidate changes, and deciding which
//! candidates qualify for dispatch.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};
use tracing::trace;

use crate::config::WatcherConfig;
use crate::sync::lock_or_recover;
use crate::types::ChangeKind;
use crate::watch::dedup::DedupFilter;

/// A change as reported by the OS, before any filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    pub kind: ChangeKind,
    pub path: PathBuf,
    pub old_path: Option<PathBuf>,
}

impl RawChange {
    fn simple(kind: ChangeKind, path: &Path) -> Self {
        Self {
            kind,
            path: path.to_path_buf(),
            old_path: None,
        }
    }
}

/// Map one `notify` event onto zero or more raw changes.
///
/// Rename halves (`RenameMode::From` / `RenameMode::To`) are ignored: the
/// backends that report them also report the paired `RenameMode::Both`
/// event, which becomes a single `Renamed` change. Backends that cannot pair
/// renames (`RenameMode::Any`) are mapped on whether the path still exists.
pub fn translate(event: &Event) -> Vec<RawChange> {
    match &event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .map(|p| RawChange::simple(ChangeKind::Created, p))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|p| RawChange::simple(ChangeKind::Deleted, p))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to, ..] => vec![RawChange {
                kind: ChangeKind::Renamed,
                path: to.clone(),
                old_path: Some(from.clone()),
            }],
            _ => Vec::new(),
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::From | RenameMode::To)) => {
            trace!(paths = ?event.paths, "ignoring unpaired rename half");
            Vec::new()
        }
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                let kind = if p.exists() {
                    ChangeKind::Created
                } else {
                    ChangeKind::Deleted
                };
                RawChange::simple(kind, p)
            })
            .collect(),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .map(|p| RawChange::simple(ChangeKind::Changed, p))
            .collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Subscription, name, path and duplicate filters of one watcher.
#[derive(Debug, Clone)]
pub struct EventFilter {
    config: Arc<WatcherConfig>,
    dedup: Option<Arc<Mutex<DedupFilter>>>,
}

impl EventFilter {
    pub fn new(config: Arc<WatcherConfig>) -> Self {
        let dedup = config
            .dedup_window
            .map(|window| Arc::new(Mutex::new(DedupFilter::new(window))));
        Self { config, dedup }
    }

    pub fn dedup(&self) -> Option<&Arc<Mutex<DedupFilter>>> {
        self.dedup.as_ref()
    }

    /// Everything but the duplicate check: subscription flag, file-name glob
    /// (either side of a rename may match) and the per-kind path regex.
    pub fn accepts(&self, change: &RawChange) -> bool {
        let cfg = &self.config;
        if !cfg.subscriptions.accepts(change.kind) {
            return false;
        }

        let name_ok = cfg.name_filter.matches_path(&change.path)
            || change
                .old_path
                .as_deref()
                .is_some_and(|old| cfg.name_filter.matches_path(old));
        if !name_ok {
            return false;
        }

        cfg.path_filters.accepts(change.kind, &change.path)
    }

    /// Full admission check, recording the path in the dedup collection when
    /// it is forwarded.
    pub fn admit(&self, change: &RawChange, now: Instant) -> bool {
        if !self.accepts(change) {
            return false;
        }
        match &self.dedup {
            None => true,
            Some(dedup) => {
                let mut guard = lock_or_recover(dedup);
                let forward = guard.should_forward(change.kind, &change.path, now);
                if !forward {
                    trace!(path = ?change.path, kind = %change.kind, "suppressed duplicate notification");
                }
                forward
            }
        }
    }
}
