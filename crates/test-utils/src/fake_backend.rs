#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dirwatch::config::WatcherConfig;
use dirwatch::exec::{ActionBackend, ActionError, ActionFuture};
use dirwatch::types::ChangeEvent;

#[derive(Debug, Default)]
struct Counters {
    running: usize,
    peak: usize,
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Mutex<Vec<ChangeEvent>>,
    finished: AtomicUsize,
    total: Mutex<Counters>,
    per_daemon: Mutex<HashMap<String, Counters>>,
}

/// A fake action backend that:
/// - records every dispatched event (at dispatch time)
/// - tracks current and peak concurrency, overall and per daemon
/// - optionally sleeps to simulate work and optionally fails.
#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    state: Arc<FakeState>,
    work: Duration,
    failure: Option<ActionError>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every action takes `work` to finish.
    pub fn with_work(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    /// Every action finishes with `err`.
    pub fn failing(mut self, err: ActionError) -> Self {
        self.failure = Some(err);
        self
    }

    pub fn calls(&self) -> Vec<ChangeEvent> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.calls.lock().unwrap().len()
    }

    pub fn finished(&self) -> usize {
        self.state.finished.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.state.total.lock().unwrap().peak
    }

    pub fn peak_concurrency_for(&self, daemon: &str) -> usize {
        self.state
            .per_daemon
            .lock()
            .unwrap()
            .get(daemon)
            .map(|c| c.peak)
            .unwrap_or(0)
    }

    fn enter(&self, daemon: &str) {
        let mut total = self.state.total.lock().unwrap();
        total.running += 1;
        total.peak = total.peak.max(total.running);

        let mut per_daemon = self.state.per_daemon.lock().unwrap();
        let c = per_daemon.entry(daemon.to_string()).or_default();
        c.running += 1;
        c.peak = c.peak.max(c.running);
    }
}

fn leave(state: &FakeState, daemon: &str) {
    state.total.lock().unwrap().running -= 1;
    if let Some(c) = state.per_daemon.lock().unwrap().get_mut(daemon) {
        c.running -= 1;
    }
    state.finished.fetch_add(1, Ordering::SeqCst);
}

impl ActionBackend for FakeBackend {
    fn execute(&self, daemon: Arc<WatcherConfig>, event: ChangeEvent) -> ActionFuture {
        self.state.calls.lock().unwrap().push(event);
        self.enter(&daemon.name);

        let state = Arc::clone(&self.state);
        let work = self.work;
        let failure = self.failure.clone();
        Box::pin(async move {
            if !work.is_zero() {
                tokio::time::sleep(work).await;
            }
            leave(&state, &daemon.name);
            match failure {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }
}
