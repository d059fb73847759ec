// src/watch/recovery.rs

//! Decision logic of the recovery loop: when to recycle the OS watch handle
//! and when to run a poll scan.
//!
//! The async loop in [`crate::watch::watcher`] feeds this state machine once
//! per tick; everything here is synchronous and clock-injected.

use std::time::{Instant, SystemTime};

use crate::config::RecoverySettings;
use crate::search::FileRef;
use crate::types::{ChangeKind, RecycleReason};

/// A notification error buffered between two recovery ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchFault {
    pub message: String,
    /// OS-reported "invalid function" errors are noise and never recycle.
    pub ignorable: bool,
}

impl WatchFault {
    pub fn from_notify(err: &notify::Error) -> Self {
        Self {
            message: err.to_string(),
            ignorable: is_invalid_function(err),
        }
    }

    /// Notification buffer overflowed; some events were lost.
    pub fn overflow() -> Self {
        Self {
            message: "notification buffer overflow; events may have been missed".to_string(),
            ignorable: false,
        }
    }
}

#[cfg(windows)]
fn is_invalid_function(err: &notify::Error) -> bool {
    // ERROR_INVALID_FUNCTION
    matches!(&err.kind, notify::ErrorKind::Io(io) if io.raw_os_error() == Some(1))
}

#[cfg(not(windows))]
fn is_invalid_function(_err: &notify::Error) -> bool {
    false
}

#[derive(Debug)]
pub struct RecoveryState {
    pending: Option<RecycleReason>,
    last_interval_reset: Instant,
    ticks_since_poll: u32,
    last_good_poll: SystemTime,
}

impl RecoveryState {
    pub fn new(now: Instant, watch_started: SystemTime) -> Self {
        Self {
            pending: None,
            last_interval_reset: now,
            ticks_since_poll: 0,
            last_good_poll: watch_started,
        }
    }

    pub fn pending(&self) -> Option<RecycleReason> {
        self.pending
    }

    /// Steps 1-3 of a tick: decide whether the handle must be recycled.
    ///
    /// The flag stays set until [`RecoveryState::recycled`] is called, so a
    /// failed recycle is retried on the next tick.
    pub fn evaluate(
        &mut self,
        settings: &RecoverySettings,
        root_exists: bool,
        faults: &[WatchFault],
        now: Instant,
    ) -> Option<RecycleReason> {
        if !settings.recycling_enabled() {
            return None;
        }

        if !root_exists {
            self.pending.get_or_insert(RecycleReason::DirectoryNotFound);
        } else if faults.iter().any(|f| !f.ignorable) {
            self.pending.get_or_insert(RecycleReason::Error);
        }

        if let Some(interval) = settings.recycle_interval {
            if now.duration_since(self.last_interval_reset) >= interval {
                self.pending.get_or_insert(RecycleReason::Recycle);
                self.last_interval_reset = now;
            }
        }

        self.pending
    }

    /// A new handle is in place.
    pub fn recycled(&mut self) {
        self.pending = None;
    }

    /// Step 5: count a tick and report whether a poll scan is due.
    pub fn poll_due(&mut self, settings: &RecoverySettings) -> bool {
        if !settings.poll {
            return false;
        }
        self.ticks_since_poll += 1;
        if self.ticks_since_poll >= settings.poll_ticks {
            self.ticks_since_poll = 0;
            return true;
        }
        false
    }

    pub fn last_good_poll(&self) -> SystemTime {
        self.last_good_poll
    }

    /// Record a poll that finished without search errors.
    pub fn poll_succeeded(&mut self, started: SystemTime) {
        self.last_good_poll = started;
    }
}

/// Classify a scanned file against the last good poll time.
///
/// Files created after `since` are `Created`; files only written after it
/// are `Changed`; anything older is not a missed change.
pub fn missed_change(file: &FileRef, since: SystemTime) -> Option<ChangeKind> {
    if file.created.is_some_and(|t| t > since) {
        Some(ChangeKind::Created)
    } else if file.modified.is_some_and(|t| t > since) {
        Some(ChangeKind::Changed)
    } else {
        None
    }
}
