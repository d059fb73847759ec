// src/engine/pipeline.rs

//! The per-task checks run by the dispatch worker before an action starts.
//!
//! Steps run in a fixed order: batch cap, delay, must-exist, lock check,
//! rename-before-run. The first step that does not pass decides the
//! [`Verdict`]; a task that passes all of them is dispatched.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, trace};

use crate::config::{DispatchPolicy, WatcherConfig};
use crate::engine::queue::DispatchQueue;
use crate::fs::FileSystem;
use crate::types::{CancelReason, ChangeEvent};

/// Why a task went back into the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueCause {
    BatchCap,
    Delayed,
    Locked,
    RenameRetry,
}

/// Outcome of running the pipeline on one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Requeue(ChangeEvent, RequeueCause),
    Cancel(ChangeEvent, CancelReason),
    /// Ready to run; the path may differ from the queued one after a rename.
    Dispatch(ChangeEvent),
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    fs: Arc<dyn FileSystem>,
    /// `0` means unlimited.
    queue_limit: usize,
}

impl Pipeline {
    pub fn new(fs: Arc<dyn FileSystem>, queue_limit: usize) -> Self {
        Self { fs, queue_limit }
    }

    /// Run every step for `event`, which has just been popped from `queue`.
    ///
    /// `in_flight` is the number of actions currently running for the
    /// task's daemon. Bookkeeping for the task is forgotten on `Cancel` and
    /// `Dispatch`.
    pub fn evaluate(
        &self,
        queue: &mut DispatchQueue,
        daemon: &WatcherConfig,
        event: ChangeEvent,
        in_flight: usize,
        now: SystemTime,
    ) -> Verdict {
        let policy = &daemon.policy;

        if policy.batch_size > 0 && in_flight >= policy.batch_size {
            return Verdict::Requeue(event, RequeueCause::BatchCap);
        }

        if !policy.delay.is_zero() {
            let due = event.timestamp.checked_add(policy.delay);
            if due.is_none_or(|due| now < due) {
                queue.mark_delayed(event.id);
                return Verdict::Requeue(event, RequeueCause::Delayed);
            }
            queue.clear_delayed(event.id);
        }

        if policy.must_exist && !self.fs.exists(&event.path) {
            queue.forget(event.id);
            return Verdict::Cancel(event, CancelReason::FileMissing);
        }

        if policy.lock_check {
            if self.is_locked(&event.path, policy, now) {
                let retries = queue.bump_lock_retry(event.id);
                let retries_left =
                    policy.max_lock_retries == 0 || retries <= policy.max_lock_retries;
                let fits = self.queue_limit == 0 || queue.len() < self.queue_limit;
                if retries_left && fits {
                    trace!(daemon = %daemon.name, id = event.id, retries, "file locked; retrying");
                    return Verdict::Requeue(event, RequeueCause::Locked);
                }
                debug!(
                    daemon = %daemon.name,
                    id = event.id,
                    retries,
                    queue_full = !fits,
                    "giving up on locked file"
                );
                queue.forget(event.id);
                return Verdict::Cancel(event, CancelReason::LockTestFailed);
            }
            queue.clear_lock_retry(event.id);
        }

        if policy.rename_before_run {
            return self.rename(queue, daemon, event);
        }

        queue.forget(event.id);
        Verdict::Dispatch(event)
    }

    /// A file counts as locked while it was written within the grace period
    /// or while it cannot be opened exclusively. A path that no longer
    /// exists is never locked.
    fn is_locked(&self, path: &Path, policy: &DispatchPolicy, now: SystemTime) -> bool {
        if !policy.lock_grace.is_zero() {
            let recently_written = self
                .fs
                .metadata(path)
                .ok()
                .and_then(|meta| meta.modified)
                .is_some_and(|modified| {
                    modified
                        .checked_add(policy.lock_grace)
                        .is_none_or(|until| until > now)
                });
            if recently_written {
                return true;
            }
        }
        match self.fs.try_open_exclusive(path) {
            Ok(()) => false,
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(err) => {
                trace!(path = ?path, error = %err, "exclusive open failed");
                true
            }
        }
    }

    fn rename(&self, queue: &mut DispatchQueue, daemon: &WatcherConfig, event: ChangeEvent) -> Verdict {
        if self.fs.is_dir(&event.path) {
            queue.forget(event.id);
            return Verdict::Cancel(event, CancelReason::RenameFailed);
        }

        let target = temp_path(&event);
        match self.fs.rename(&event.path, &target) {
            Ok(()) => {
                debug!(daemon = %daemon.name, id = event.id, from = ?event.path, to = ?target, "renamed before run");
                queue.forget(event.id);
                Verdict::Dispatch(event.with_path(target))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                queue.forget(event.id);
                Verdict::Cancel(event, CancelReason::RenameFailed)
            }
            Err(err) => {
                let retries = queue.bump_rename_retry(event.id);
                if retries <= daemon.policy.max_rename_retries {
                    trace!(daemon = %daemon.name, id = event.id, retries, error = %err, "rename failed; retrying");
                    return Verdict::Requeue(event, RequeueCause::RenameRetry);
                }
                debug!(daemon = %daemon.name, id = event.id, retries, error = %err, "giving up on rename");
                queue.forget(event.id);
                Verdict::Cancel(event, CancelReason::RenameFailed)
            }
        }
    }
}

/// `<dir>/<file name>.<id in hex>.tmp`
pub fn temp_path(event: &ChangeEvent) -> PathBuf {
    let name = format!("{}.{:x}.tmp", event.file_name(), event.id);
    event.path.with_file_name(name)
}
