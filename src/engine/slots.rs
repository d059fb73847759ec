// src/engine/slots.rs

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::sync::lock_or_recover;
use crate::types::DaemonName;

/// Running-action and outstanding-task counters.
///
/// - `outstanding` counts tasks accepted into the pipeline that have not yet
///   been cancelled or finished running (queued + in flight).
/// - `in_flight` counts actions currently running, in total and per daemon.
///
/// Only the dispatch worker reserves a slot; completions may release from
/// any task. Decrements saturate so a late completion after a discarded
/// session cannot underflow.
#[derive(Debug, Default)]
pub struct Slots {
    per_daemon: Mutex<HashMap<DaemonName, usize>>,
    in_flight: AtomicUsize,
    outstanding: AtomicUsize,
}

fn saturating_dec(counter: &AtomicUsize) {
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
}

impl Slots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight_for(&self, daemon: &str) -> usize {
        lock_or_recover(&self.per_daemon)
            .get(daemon)
            .copied()
            .unwrap_or(0)
    }

    /// A task entered the pipeline.
    pub(crate) fn accept(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    /// A task left the pipeline without running (cancelled or discarded).
    pub(crate) fn settle(&self) {
        saturating_dec(&self.outstanding);
    }

    pub(crate) fn reserve(&self, daemon: &str) {
        *lock_or_recover(&self.per_daemon)
            .entry(daemon.to_string())
            .or_insert(0) += 1;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    /// An action finished; frees its slot and settles the task.
    pub(crate) fn release(&self, daemon: &str) {
        {
            let mut per_daemon = lock_or_recover(&self.per_daemon);
            if let Some(n) = per_daemon.get_mut(daemon) {
                *n = n.saturating_sub(1);
                if *n == 0 {
                    per_daemon.remove(daemon);
                }
            }
        }
        saturating_dec(&self.in_flight);
        self.settle();
    }
}
