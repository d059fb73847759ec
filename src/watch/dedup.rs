// src/watch/dedup.rs

//! Duplicate-notification suppression.
//!
//! One collection per change kind (created/changed/deleted). Each collection
//! is kept sorted by expiry so the oldest entry is always at index 0 and the
//! sweeper only ever drains a prefix. Renames are never deduplicated.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::types::ChangeKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupEntry {
    pub path: PathBuf,
    pub expires: Instant,
}

#[derive(Debug)]
pub struct DedupFilter {
    window: Duration,
    created: Vec<DedupEntry>,
    changed: Vec<DedupEntry>,
    deleted: Vec<DedupEntry>,
}

impl DedupFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            created: Vec::new(),
            changed: Vec::new(),
            deleted: Vec::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn entries_mut(&mut self, kind: ChangeKind) -> Option<&mut Vec<DedupEntry>> {
        match kind {
            ChangeKind::Created => Some(&mut self.created),
            ChangeKind::Changed => Some(&mut self.changed),
            ChangeKind::Deleted => Some(&mut self.deleted),
            ChangeKind::Renamed | ChangeKind::SystemGenerated => None,
        }
    }

    /// Decide whether a notification for `path` should be forwarded.
    ///
    /// - absent: remember it until `now + window`, forward
    /// - present but expired: refresh the expiry, forward
    /// - present and live: suppress
    pub fn should_forward(&mut self, kind: ChangeKind, path: &Path, now: Instant) -> bool {
        let window = self.window;
        let Some(entries) = self.entries_mut(kind) else {
            return true;
        };

        if let Some(idx) = entries.iter().position(|e| e.path == path) {
            if entries[idx].expires > now {
                return false;
            }
            entries.remove(idx);
        }

        // A window past the clock's range cannot be tracked; forward as-is.
        if let Some(expires) = now.checked_add(window) {
            insert_sorted(
                entries,
                DedupEntry {
                    path: path.to_path_buf(),
                    expires,
                },
            );
        }
        true
    }

    /// Drop every entry that expired at or before `now`. Returns how many
    /// entries were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        [&mut self.created, &mut self.changed, &mut self.deleted]
            .into_iter()
            .map(|entries| {
                let expired = entries.partition_point(|e| e.expires <= now);
                entries.drain(..expired);
                expired
            })
            .sum()
    }

    pub fn len(&self) -> usize {
        self.created.len() + self.changed.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Oldest entry of one kind (index 0), if any.
    pub fn oldest(&self, kind: ChangeKind) -> Option<&DedupEntry> {
        match kind {
            ChangeKind::Created => self.created.first(),
            ChangeKind::Changed => self.changed.first(),
            ChangeKind::Deleted => self.deleted.first(),
            _ => None,
        }
    }
}

fn insert_sorted(entries: &mut Vec<DedupEntry>, entry: DedupEntry) {
    let at = entries.partition_point(|e| e.expires <= entry.expires);
    entries.insert(at, entry);
}
