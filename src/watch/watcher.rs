// src/watch/watcher.rs

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, info, trace, warn};

use crate::config::WatcherConfig;
use crate::errors::{DirwatchError, Result};
use crate::events::{Notification, Notifier};
use crate::fs::FileSystem;
use crate::search::{DirectorySearcher, FileRef, SearchObserver};
use crate::sync::lock_or_recover;
use crate::types::{ChangeEvent, ChangeKind, RecycleReason, WatcherState};
use crate::watch::ChangeSink;
use crate::watch::dedup::DedupFilter;
use crate::watch::filters::{EventFilter, RawChange, translate};
use crate::watch::recovery::{RecoveryState, WatchFault, missed_change};

/// Sweeper cadence right after it removed something.
const SWEEP_FAST: Duration = Duration::from_millis(50);
/// Sweeper cadence when nothing expired.
const SWEEP_IDLE: Duration = Duration::from_secs(1);

/// Raw `notify` callback output, tagged with the generation of the handle
/// that produced it.
type RawMessage = (u64, notify::Result<Event>);

/// One watched root directory.
///
/// A watcher owns its OS watch handle and up to four background tasks
/// (event loop, dedup sweeper, recovery loop, startup scan). Qualifying
/// changes are handed to the [`ChangeSink`] it was built with.
pub struct Watcher {
    config: Arc<WatcherConfig>,
    fs: Arc<dyn FileSystem>,
    notifier: Notifier,
    sink: ChangeSink,
    state: Arc<Mutex<WatcherState>>,
    active: Mutex<Option<ActiveWatch>>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("daemon", &self.config.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct ActiveWatch {
    ctx: Arc<WatchContext>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Watcher {
    pub fn new(
        config: Arc<WatcherConfig>,
        fs: Arc<dyn FileSystem>,
        notifier: Notifier,
        sink: ChangeSink,
    ) -> Self {
        Self {
            config,
            fs,
            notifier,
            sink,
            state: Arc::new(Mutex::new(WatcherState::Stopped)),
            active: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &Arc<WatcherConfig> {
        &self.config
    }

    pub fn state(&self) -> WatcherState {
        *lock_or_recover(&self.state)
    }

    /// Subscribe to OS notifications and spawn the background tasks.
    ///
    /// Returns `Ok(false)` when the root is not a usable directory. Must be
    /// called from within a Tokio runtime.
    pub fn start(&self) -> Result<bool> {
        let mut active = lock_or_recover(&self.active);
        if active.is_some() {
            return Err(DirwatchError::invalid_op(format!(
                "watcher '{}' is already {:?}",
                self.config.name,
                self.state()
            )));
        }

        let cfg = &self.config;
        if !self.fs.is_dir(&cfg.path) {
            warn!(daemon = %cfg.name, path = ?cfg.path, "watch root is not a directory; not starting");
            self.notifier.emit(Notification::WatchError {
                daemon: cfg.name.clone(),
                message: format!("path {:?} is not a valid directory", cfg.path),
            });
            return Ok(false);
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(WatchContext {
            config: Arc::clone(cfg),
            fs: Arc::clone(&self.fs),
            notifier: self.notifier.clone(),
            sink: self.sink.clone(),
            filter: EventFilter::new(Arc::clone(cfg)),
            state: Arc::clone(&self.state),
            raw_tx,
            handle: Mutex::new(None),
            generation: AtomicU64::new(0),
            faults: Mutex::new(Vec::new()),
        });

        ctx.set_state(WatcherState::Starting);
        let handle = match ctx.open_handle() {
            Ok(handle) => handle,
            Err(err) if is_missing_path(&err) => {
                warn!(daemon = %cfg.name, error = %err, "watch root vanished during start");
                ctx.set_state(WatcherState::Stopped);
                return Ok(false);
            }
            Err(err) => {
                ctx.set_state(WatcherState::Stopped);
                return Err(err.into());
            }
        };
        *lock_or_recover(&ctx.handle) = Some(handle);

        let started_at = SystemTime::now();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut tasks = vec![tokio::spawn(event_loop(
            Arc::clone(&ctx),
            raw_rx,
            shutdown_rx.clone(),
        ))];
        if let Some(dedup) = ctx.filter.dedup() {
            tasks.push(tokio::spawn(sweep_loop(
                Arc::clone(dedup),
                shutdown_rx.clone(),
            )));
        }
        if cfg.recovery.is_active() {
            tasks.push(tokio::spawn(recovery_loop(
                Arc::clone(&ctx),
                shutdown_rx.clone(),
                started_at,
            )));
        }
        if cfg.generate_events_at_startup {
            tasks.push(tokio::spawn(startup_scan(Arc::clone(&ctx), shutdown_rx)));
        } else {
            ctx.mark_running();
        }

        *active = Some(ActiveWatch {
            ctx,
            shutdown: shutdown_tx,
            tasks,
        });
        Ok(true)
    }

    /// Tear down the OS handle, stop and join every background task, then
    /// report `Stopped`. Returns false if the watcher was not started.
    ///
    /// Must not be awaited from inside a notification callback of the same
    /// watcher.
    pub async fn stop(&self) -> bool {
        let Some(active) = lock_or_recover(&self.active).take() else {
            return false;
        };
        let ActiveWatch {
            ctx,
            shutdown,
            tasks,
        } = active;

        let handle = lock_or_recover(&ctx.handle).take();
        drop(handle);
        let _ = shutdown.send(true);

        for task in tasks {
            if let Err(err) = task.await {
                warn!(daemon = %self.config.name, error = %err, "watcher task ended abnormally");
            }
        }

        ctx.set_state(WatcherState::Stopped);
        self.notifier.emit(Notification::WatcherStopped {
            daemon: self.config.name.clone(),
        });
        true
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if let Some(active) = lock_or_recover(&self.active).take() {
            let _ = active.shutdown.send(true);
            for task in active.tasks {
                task.abort();
            }
        }
    }
}

/// State shared between a running watcher's tasks.
struct WatchContext {
    config: Arc<WatcherConfig>,
    fs: Arc<dyn FileSystem>,
    notifier: Notifier,
    sink: ChangeSink,
    filter: EventFilter,
    state: Arc<Mutex<WatcherState>>,
    raw_tx: mpsc::UnboundedSender<RawMessage>,
    handle: Mutex<Option<RecommendedWatcher>>,
    /// Generation of the live handle; messages from older handles carry a
    /// smaller number and their faults are ignored.
    generation: AtomicU64,
    /// Faults buffered since the last recovery tick.
    faults: Mutex<Vec<WatchFault>>,
}

impl WatchContext {
    fn open_handle(&self) -> notify::Result<RecommendedWatcher> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let tx = self.raw_tx.clone();
        let mut handle = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // The receiver only goes away when the watcher is stopping.
                let _ = tx.send((generation, res));
            },
            Config::default(),
        )?;
        let mode = if self.config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        handle.watch(&self.config.path, mode)?;
        debug!(daemon = %self.config.name, generation, "watch handle opened");
        Ok(handle)
    }

    fn set_state(&self, state: WatcherState) {
        *lock_or_recover(&self.state) = state;
        self.notifier.emit(Notification::WatcherStateChanged {
            daemon: self.config.name.clone(),
            state,
        });
    }

    fn mark_running(&self) {
        self.set_state(WatcherState::Running);
        self.notifier.emit(Notification::WatcherStarted {
            daemon: self.config.name.clone(),
        });
    }

    fn handle_raw(&self, generation: u64, res: notify::Result<Event>) {
        let current = generation == self.generation.load(Ordering::SeqCst);
        match res {
            Ok(event) => {
                trace!(daemon = %self.config.name, ?event, "notify event");
                if event.need_rescan() {
                    self.record_fault(current, WatchFault::overflow());
                }
                for change in translate(&event) {
                    self.forward(change);
                }
            }
            Err(err) => self.record_fault(current, WatchFault::from_notify(&err)),
        }
    }

    fn record_fault(&self, current: bool, fault: WatchFault) {
        self.notifier.emit(Notification::WatchError {
            daemon: self.config.name.clone(),
            message: fault.message.clone(),
        });
        if current {
            lock_or_recover(&self.faults).push(fault);
        } else {
            debug!(daemon = %self.config.name, "ignoring fault from a retired watch handle");
        }
    }

    fn take_faults(&self) -> Vec<WatchFault> {
        std::mem::take(&mut *lock_or_recover(&self.faults))
    }

    /// Run a change through every filter and dispatch it if it survives.
    fn forward(&self, change: RawChange) -> bool {
        // Writes inside a directory also touch the directory itself.
        if change.kind == ChangeKind::Changed && self.fs.is_dir(&change.path) {
            return false;
        }
        if !self.filter.admit(&change, Instant::now()) {
            return false;
        }
        self.dispatch(change);
        true
    }

    fn dispatch(&self, change: RawChange) {
        let mut event = ChangeEvent::new(self.config.name.clone(), change.kind, change.path);
        event.old_path = change.old_path;
        debug!(
            daemon = %event.daemon,
            id = event.id,
            kind = %event.kind,
            path = ?event.path,
            "change detected"
        );
        self.notifier.emit(Notification::ChangeDetected(event.clone()));
        self.sink.submit(event);
    }

    /// Replace the OS handle. Returns false when the new handle could not be
    /// created; the caller retries on the next tick.
    fn recycle(&self, reason: RecycleReason) -> bool {
        let old = lock_or_recover(&self.handle).take();
        drop(old);

        match self.open_handle() {
            Ok(handle) => {
                *lock_or_recover(&self.handle) = Some(handle);
                info!(daemon = %self.config.name, ?reason, "watch handle recycled");
                self.notifier.emit(Notification::Recycled {
                    daemon: self.config.name.clone(),
                    reason,
                });
                true
            }
            Err(err) => {
                debug!(daemon = %self.config.name, ?reason, error = %err, "recycle failed; retrying next tick");
                false
            }
        }
    }

    /// Blocking walk of the root. The flag is true when no directory failed.
    fn scan(&self, shutdown: &watch::Receiver<bool>) -> (Vec<FileRef>, bool) {
        let mut observer = ScanObserver {
            ctx: self,
            shutdown,
            failed: false,
        };
        let files = DirectorySearcher::new(self.fs.as_ref()).search(
            &self.config.path,
            self.config.recursive,
            Some(self.config.name_filter.regex()),
            &mut observer,
        );
        let clean = !observer.failed;
        (files, clean)
    }

    /// Blocking poll scan. Returns whether the scan completed without errors.
    fn poll(&self, since: SystemTime, shutdown: &watch::Receiver<bool>) -> bool {
        let (files, clean) = self.scan(shutdown);
        let mut forwarded = 0usize;
        for file in files {
            if let Some(kind) = missed_change(&file, since) {
                let change = RawChange {
                    kind,
                    path: file.path,
                    old_path: None,
                };
                if self.forward(change) {
                    forwarded += 1;
                }
            }
        }
        debug!(daemon = %self.config.name, forwarded, clean, "poll scan finished");
        clean
    }
}

struct ScanObserver<'a> {
    ctx: &'a WatchContext,
    shutdown: &'a watch::Receiver<bool>,
    failed: bool,
}

impl SearchObserver for ScanObserver<'_> {
    fn directory_entered(&mut self, dir: &Path) {
        self.ctx.notifier.emit(Notification::SearchProgress {
            daemon: self.ctx.config.name.clone(),
            directory: dir.to_path_buf(),
        });
    }

    fn directory_failed(&mut self, dir: &Path, error: &anyhow::Error) {
        self.failed = true;
        self.ctx.notifier.emit(Notification::SearchError {
            daemon: self.ctx.config.name.clone(),
            directory: dir.to_path_buf(),
            message: format!("{error:#}"),
        });
    }

    fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }
}

fn is_missing_path(err: &notify::Error) -> bool {
    match &err.kind {
        notify::ErrorKind::PathNotFound => true,
        notify::ErrorKind::Io(io) => io.kind() == std::io::ErrorKind::NotFound,
        _ => false,
    }
}

async fn event_loop(
    ctx: Arc<WatchContext>,
    mut raw_rx: mpsc::UnboundedReceiver<RawMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            msg = raw_rx.recv() => match msg {
                Some((generation, res)) => ctx.handle_raw(generation, res),
                None => break,
            },
        }
    }
    debug!(daemon = %ctx.config.name, "watch event loop finished");
}

async fn sweep_loop(dedup: Arc<Mutex<DedupFilter>>, mut shutdown: watch::Receiver<bool>) {
    let mut wait = SWEEP_IDLE;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(wait) => {}
        }
        let removed = lock_or_recover(&dedup).sweep(Instant::now());
        wait = if removed > 0 { SWEEP_FAST } else { SWEEP_IDLE };
    }
}

async fn recovery_loop(
    ctx: Arc<WatchContext>,
    mut shutdown: watch::Receiver<bool>,
    started_at: SystemTime,
) {
    let settings = ctx.config.recovery.clone();
    let mut state = RecoveryState::new(Instant::now(), started_at);
    let mut ticker = interval(settings.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let faults = ctx.take_faults();
        let root_exists = ctx.fs.is_dir(&ctx.config.path);
        if let Some(reason) = state.evaluate(&settings, root_exists, &faults, Instant::now()) {
            if ctx.recycle(reason) {
                state.recycled();
            }
        }

        if state.poll_due(&settings) {
            let poll_started = SystemTime::now();
            let since = state.last_good_poll();
            let poll_ctx = Arc::clone(&ctx);
            let poll_shutdown = shutdown.clone();
            match tokio::task::spawn_blocking(move || poll_ctx.poll(since, &poll_shutdown)).await {
                Ok(true) => state.poll_succeeded(poll_started),
                Ok(false) => {}
                Err(err) => warn!(daemon = %ctx.config.name, error = %err, "poll scan task failed"),
            }
        }
    }
    debug!(daemon = %ctx.config.name, "recovery loop finished");
}

async fn startup_scan(ctx: Arc<WatchContext>, shutdown: watch::Receiver<bool>) {
    let scan_ctx = Arc::clone(&ctx);
    let scan_shutdown = shutdown.clone();
    let result = tokio::task::spawn_blocking(move || {
        let (files, _) = scan_ctx.scan(&scan_shutdown);
        let count = files.len();
        for file in files {
            if *scan_shutdown.borrow() {
                break;
            }
            scan_ctx.dispatch(RawChange {
                kind: ChangeKind::SystemGenerated,
                path: file.path,
                old_path: None,
            });
        }
        count
    })
    .await;

    match result {
        Ok(count) => debug!(daemon = %ctx.config.name, files = count, "startup scan finished"),
        Err(err) => warn!(daemon = %ctx.config.name, error = %err, "startup scan task failed"),
    }

    if !*shutdown.borrow() {
        ctx.mark_running();
    }
}
