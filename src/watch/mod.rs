// src/watch/mod.rs

//! Directory watching and change detection.
//!
//! This module is responsible for:
//! - Translating OS notifications (`notify`) into [`ChangeEvent`]s.
//! - Filtering them by subscription, file-name glob, path regex and the
//!   duplicate window.
//! - Keeping the OS handle healthy (recycling) and recovering missed changes
//!   (poll scans).
//!
//! It does **not** know about the dispatch queue; qualifying changes leave
//! through a [`ChangeSink`].

pub mod dedup;
pub mod filters;
pub mod recovery;
pub mod watcher;

use std::sync::Arc;

use crate::types::ChangeEvent;

pub use dedup::{DedupEntry, DedupFilter};
pub use filters::{EventFilter, RawChange, translate};
pub use recovery::{RecoveryState, WatchFault, missed_change};
pub use watcher::Watcher;

/// Destination of qualifying changes, usually the controller's queue.
#[derive(Clone)]
pub struct ChangeSink(Arc<dyn Fn(ChangeEvent) + Send + Sync>);

impl ChangeSink {
    pub fn new(f: impl Fn(ChangeEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn submit(&self, event: ChangeEvent) {
        (self.0)(event)
    }
}

impl std::fmt::Debug for ChangeSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSink").finish_non_exhaustive()
    }
}
