// src/engine/queue.rs

use std::collections::{HashMap, HashSet, VecDeque};

use crate::types::{ChangeEvent, EventId};

/// FIFO of pending changes plus the per-task retry bookkeeping.
///
/// Semantics:
/// - Tasks leave from the front and re-enter at the back, so a task that is
///   waiting on something never blocks the ones behind it.
/// - Counters and the delayed mark are keyed by [`EventId`], which survives
///   the rename-before-run path swap.
/// - A task is never lock-retrying and delayed at the same time: the delay
///   step runs first and clears its mark before the lock step can count.
/// - [`DispatchQueue::forget`] must be called once a task is dropped or
///   dispatched; nothing else removes its bookkeeping.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    tasks: VecDeque<ChangeEvent>,
    lock_retries: HashMap<EventId, u32>,
    rename_retries: HashMap<EventId, u32>,
    delayed: HashSet<EventId>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn push(&mut self, event: ChangeEvent) {
        self.tasks.push_back(event);
    }

    /// Put a popped task back where it was.
    pub fn push_front(&mut self, event: ChangeEvent) {
        self.tasks.push_front(event);
    }

    pub fn pop(&mut self) -> Option<ChangeEvent> {
        self.tasks.pop_front()
    }

    pub fn mark_delayed(&mut self, id: EventId) {
        self.delayed.insert(id);
    }

    /// Returns true if the mark was set.
    pub fn clear_delayed(&mut self, id: EventId) -> bool {
        self.delayed.remove(&id)
    }

    pub fn is_delayed(&self, id: EventId) -> bool {
        self.delayed.contains(&id)
    }

    /// Count one more failed lock check and return the new total.
    pub fn bump_lock_retry(&mut self, id: EventId) -> u32 {
        let n = self.lock_retries.entry(id).or_insert(0);
        *n += 1;
        *n
    }

    pub fn clear_lock_retry(&mut self, id: EventId) {
        self.lock_retries.remove(&id);
    }

    pub fn lock_retries(&self, id: EventId) -> u32 {
        self.lock_retries.get(&id).copied().unwrap_or(0)
    }

    /// Count one more failed rename and return the new total.
    pub fn bump_rename_retry(&mut self, id: EventId) -> u32 {
        let n = self.rename_retries.entry(id).or_insert(0);
        *n += 1;
        *n
    }

    pub fn rename_retries(&self, id: EventId) -> u32 {
        self.rename_retries.get(&id).copied().unwrap_or(0)
    }

    /// Drop every piece of bookkeeping for `id`.
    pub fn forget(&mut self, id: EventId) {
        self.lock_retries.remove(&id);
        self.rename_retries.remove(&id);
        self.delayed.remove(&id);
    }

    /// True when no retry or delay state is held for any task.
    pub fn bookkeeping_is_empty(&self) -> bool {
        self.lock_retries.is_empty() && self.rename_retries.is_empty() && self.delayed.is_empty()
    }

    /// Remove every task and all bookkeeping, returning the tasks in order.
    pub fn drain(&mut self) -> Vec<ChangeEvent> {
        self.lock_retries.clear();
        self.rename_retries.clear();
        self.delayed.clear();
        self.tasks.drain(..).collect()
    }
}
