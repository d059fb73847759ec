// src/engine/controller.rs

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ConfigFile, ControllerOptions, WatcherConfig};
use crate::errors::{DirwatchError, Result};
use crate::events::{Notification, NotificationHub, Notifier};
use crate::exec::ActionBackend;
use crate::fs::FileSystem;
use crate::sync::lock_or_recover;
use crate::types::{ChangeEvent, DaemonName, WatcherState};
use crate::watch::{ChangeSink, Watcher};

use super::runtime::{Intake, WorkerContext, WorkerControl, spawn_dispatch_worker};
use super::slots::Slots;

/// Owns a named set of watchers and the dispatch pipeline they feed.
///
/// A *session* spans from the first watcher starting to the drain that
/// follows the last one stopping. The dispatch worker lives exactly as long
/// as the session.
pub struct Controller {
    fs: Arc<dyn FileSystem>,
    backend: Arc<dyn ActionBackend>,
    hub: NotificationHub,
    slots: Arc<Slots>,
    intake: Intake,
    inner: Mutex<Inner>,
    stopping: AtomicBool,
    /// Serialises start/stop so their awaits never interleave.
    lifecycle: tokio::sync::Mutex<()>,
}

struct Inner {
    options: ControllerOptions,
    daemons: BTreeMap<DaemonName, Arc<Watcher>>,
    session: Option<Session>,
}

struct Session {
    control: watch::Sender<WorkerControl>,
    worker: JoinHandle<()>,
    /// `ControllerStarted` was emitted for this session.
    announced: bool,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock_or_recover(&self.inner);
        f.debug_struct("Controller")
            .field("daemons", &inner.daemons.keys().collect::<Vec<_>>())
            .field("active", &inner.session.is_some())
            .field("stopping", &self.stopping.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Create a controller with its own notification hub. Must be called
    /// from within a Tokio runtime.
    pub fn new(
        options: ControllerOptions,
        fs: Arc<dyn FileSystem>,
        backend: Arc<dyn ActionBackend>,
    ) -> Self {
        Self::with_hub(NotificationHub::new(), options, fs, backend)
    }

    /// Create a controller around an existing hub, for backends that need
    /// the hub's notifier before the controller exists.
    pub fn with_hub(
        hub: NotificationHub,
        options: ControllerOptions,
        fs: Arc<dyn FileSystem>,
        backend: Arc<dyn ActionBackend>,
    ) -> Self {
        let slots = Arc::new(Slots::new());
        Self {
            fs,
            backend,
            hub,
            intake: Intake::new(Arc::clone(&slots)),
            slots,
            inner: Mutex::new(Inner {
                options,
                daemons: BTreeMap::new(),
                session: None,
            }),
            stopping: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Build a controller from a validated configuration file.
    pub fn from_config(
        config: ConfigFile,
        hub: NotificationHub,
        fs: Arc<dyn FileSystem>,
        backend: Arc<dyn ActionBackend>,
    ) -> Result<Self> {
        let controller = Self::with_hub(hub, config.controller, fs, backend);
        for daemon in config.daemons {
            controller.add(daemon)?;
        }
        Ok(controller)
    }

    // ---------------------------------------------------------------------
    // Notifications
    // ---------------------------------------------------------------------

    pub fn notifier(&self) -> Notifier {
        self.hub.notifier()
    }

    pub fn subscribe(&self, subscriber: impl Fn(&Notification) + Send + Sync + 'static) {
        self.hub.subscribe(subscriber);
    }

    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<Notification> {
        self.hub.subscribe_channel()
    }

    /// Wait until every notification emitted so far was delivered.
    pub async fn flush(&self) {
        self.hub.flush().await;
    }

    // ---------------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------------

    fn guard_config_edit(&self, inner: &Inner) -> Result<()> {
        if self.is_stopping() {
            return Err(DirwatchError::invalid_op(
                "configuration cannot change while the controller is stopping",
            ));
        }
        if let Some(active) = inner.daemons.values().find(|w| w.state().is_active()) {
            return Err(DirwatchError::invalid_op(format!(
                "configuration cannot change while watcher '{}' is active",
                active.name()
            )));
        }
        Ok(())
    }

    fn build_watcher(&self, config: WatcherConfig) -> Arc<Watcher> {
        let intake = self.intake.clone();
        let sink = ChangeSink::new(move |event| {
            intake.submit(event);
        });
        Arc::new(Watcher::new(
            Arc::new(config),
            Arc::clone(&self.fs),
            self.hub.notifier(),
            sink,
        ))
    }

    pub fn options(&self) -> ControllerOptions {
        lock_or_recover(&self.inner).options.clone()
    }

    /// Replace the controller-wide options (execution mode, drain policy).
    pub fn set_options(&self, options: ControllerOptions) -> Result<()> {
        let mut inner = lock_or_recover(&self.inner);
        self.guard_config_edit(&inner)?;
        inner.options = options;
        Ok(())
    }

    pub fn add(&self, config: WatcherConfig) -> Result<()> {
        let mut inner = lock_or_recover(&self.inner);
        self.guard_config_edit(&inner)?;
        if inner.daemons.contains_key(&config.name) {
            return Err(DirwatchError::config(format!(
                "daemon '{}' already exists",
                config.name
            )));
        }
        debug!(daemon = %config.name, path = ?config.path, "daemon added");
        let name = config.name.clone();
        let watcher = self.build_watcher(config);
        inner.daemons.insert(name, watcher);
        Ok(())
    }

    /// Replace the configuration of an existing daemon.
    pub fn update(&self, config: WatcherConfig) -> Result<()> {
        let mut inner = lock_or_recover(&self.inner);
        self.guard_config_edit(&inner)?;
        if !inner.daemons.contains_key(&config.name) {
            return Err(DirwatchError::UnknownDaemon(config.name));
        }
        debug!(daemon = %config.name, "daemon updated");
        let name = config.name.clone();
        let watcher = self.build_watcher(config);
        inner.daemons.insert(name, watcher);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let mut inner = lock_or_recover(&self.inner);
        self.guard_config_edit(&inner)?;
        if inner.daemons.remove(name).is_none() {
            return Err(DirwatchError::UnknownDaemon(name.to_string()));
        }
        debug!(daemon = %name, "daemon removed");
        Ok(())
    }

    pub fn list(&self) -> Vec<Arc<WatcherConfig>> {
        lock_or_recover(&self.inner)
            .daemons
            .values()
            .map(|w| Arc::clone(w.config()))
            .collect()
    }

    // ---------------------------------------------------------------------
    // State
    // ---------------------------------------------------------------------

    pub fn state(&self, name: &str) -> Option<WatcherState> {
        lock_or_recover(&self.inner).daemons.get(name).map(|w| w.state())
    }

    /// True while any watcher is starting or running.
    pub fn is_active(&self) -> bool {
        self.watchers().iter().any(|w| w.state().is_active())
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Tasks accepted but not yet cancelled or finished.
    pub fn outstanding(&self) -> usize {
        self.slots.outstanding()
    }

    /// Actions currently running.
    pub fn in_flight(&self) -> usize {
        self.slots.in_flight()
    }

    fn watchers(&self) -> Vec<Arc<Watcher>> {
        lock_or_recover(&self.inner).daemons.values().cloned().collect()
    }

    fn watcher(&self, name: &str) -> Result<Arc<Watcher>> {
        lock_or_recover(&self.inner)
            .daemons
            .get(name)
            .cloned()
            .ok_or_else(|| DirwatchError::UnknownDaemon(name.to_string()))
    }

    /// Queue a change for a daemon as if its watcher had reported it.
    pub fn submit(&self, event: ChangeEvent) -> Result<()> {
        if !lock_or_recover(&self.inner).daemons.contains_key(&event.daemon) {
            return Err(DirwatchError::UnknownDaemon(event.daemon));
        }
        if !self.intake.submit(event) {
            return Err(DirwatchError::invalid_op("the dispatcher is not active"));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Start every stopped watcher. Returns how many started.
    ///
    /// Watchers whose root is not a usable directory are skipped with a
    /// warning; callers should compare the count with [`Controller::list`].
    pub async fn start_all(&self) -> Result<usize> {
        if self.is_stopping() {
            return Err(DirwatchError::invalid_op(
                "cannot start while the controller is stopping",
            ));
        }
        let _lifecycle = self.lifecycle.lock().await;

        let pending: Vec<Arc<Watcher>> = self
            .watchers()
            .into_iter()
            .filter(|w| !w.state().is_active())
            .collect();
        for watcher in &pending {
            watcher.config().action.validate(watcher.name())?;
        }

        self.ensure_session();
        let mut started = 0;
        let mut failure = None;
        for watcher in pending {
            match watcher.start() {
                Ok(true) => started += 1,
                Ok(false) => warn!(daemon = %watcher.name(), "watcher did not start"),
                Err(err) => {
                    warn!(daemon = %watcher.name(), error = %err, "watcher failed to start");
                    failure = Some(err);
                    break;
                }
            }
        }
        self.settle_session().await;

        match failure {
            Some(err) => Err(err),
            None => {
                info!(started, "start_all finished");
                Ok(started)
            }
        }
    }

    /// Start one watcher. `Ok(false)` means its root is not usable.
    pub async fn start(&self, name: &str) -> Result<bool> {
        if self.is_stopping() {
            return Err(DirwatchError::invalid_op(
                "cannot start while the controller is stopping",
            ));
        }
        let _lifecycle = self.lifecycle.lock().await;

        let watcher = self.watcher(name)?;
        let state = watcher.state();
        if state.is_active() {
            return Err(DirwatchError::invalid_op(format!(
                "watcher '{name}' is already {state:?}"
            )));
        }
        watcher.config().action.validate(name)?;

        self.ensure_session();
        let result = watcher.start();
        self.settle_session().await;
        result
    }

    /// Stop one running watcher. Stopping the last one drains the dispatch
    /// pipeline exactly like [`Controller::stop_all`].
    pub async fn stop(&self, name: &str) -> Result<bool> {
        let _lifecycle = self.lifecycle.lock().await;

        let watcher = self.watcher(name)?;
        match watcher.state() {
            WatcherState::Running => {}
            WatcherState::Stopped => {
                return Err(DirwatchError::invalid_op(format!(
                    "watcher '{name}' is already stopped"
                )));
            }
            WatcherState::Starting => {
                return Err(DirwatchError::invalid_op(format!(
                    "watcher '{name}' is still starting"
                )));
            }
        }

        let stopped = watcher.stop().await;
        if !self.is_active() {
            self.stopping.store(true, Ordering::SeqCst);
            self.finish_session().await;
            self.stopping.store(false, Ordering::SeqCst);
        }
        Ok(stopped)
    }

    /// Stop every watcher, then drain or discard the queue and emit
    /// `ControllerStopped` once.
    pub async fn stop_all(&self) -> Result<()> {
        if self.is_stopping() {
            return Err(DirwatchError::invalid_op("the controller is already stopping"));
        }
        let _lifecycle = self.lifecycle.lock().await;

        let watchers = self.watchers();
        if let Some(starting) = watchers
            .iter()
            .find(|w| w.state() == WatcherState::Starting)
        {
            return Err(DirwatchError::invalid_op(format!(
                "cannot stop while watcher '{}' is starting",
                starting.name()
            )));
        }

        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown(&watchers).await;
        self.stopping.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Stop everything regardless of state and drain as configured.
    pub async fn dispose(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.stopping.store(true, Ordering::SeqCst);
        let watchers = self.watchers();
        self.shutdown(&watchers).await;
        self.stopping.store(false, Ordering::SeqCst);
        debug!("controller disposed");
    }

    async fn shutdown(&self, watchers: &[Arc<Watcher>]) {
        for watcher in watchers.iter().filter(|w| w.state().is_active()) {
            watcher.stop().await;
        }
        self.finish_session().await;
    }

    fn ensure_session(&self) {
        let mut inner = lock_or_recover(&self.inner);
        if inner.session.is_some() {
            return;
        }

        let daemons = inner
            .daemons
            .iter()
            .map(|(name, w)| (name.clone(), Arc::clone(w.config())))
            .collect();
        let ctx = WorkerContext {
            daemons,
            fs: Arc::clone(&self.fs),
            backend: Arc::clone(&self.backend),
            notifier: self.hub.notifier(),
            slots: Arc::clone(&self.slots),
            options: inner.options.clone(),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = watch::channel(WorkerControl::Run);
        let worker = spawn_dispatch_worker(ctx, rx, control_rx);
        self.intake.open(tx);
        inner.session = Some(Session {
            control: control_tx,
            worker,
            announced: false,
        });
    }

    /// Announce a session that has active watchers, or tear down one that
    /// ended up with none.
    async fn settle_session(&self) {
        if self.is_active() {
            let mut inner = lock_or_recover(&self.inner);
            if let Some(session) = inner.session.as_mut() {
                if !session.announced {
                    session.announced = true;
                    self.hub.notifier().emit(Notification::ControllerStarted);
                }
            }
            return;
        }
        self.finish_session().await;
    }

    /// The drain: stop intake, let the worker finish or discard the queue,
    /// join it, then emit `ControllerStopped` if the session was announced.
    async fn finish_session(&self) {
        let (session, run_queued) = {
            let mut inner = lock_or_recover(&self.inner);
            (inner.session.take(), inner.options.run_queued_on_stop)
        };
        let Some(session) = session else {
            return;
        };

        self.intake.close();
        let mode = if run_queued {
            WorkerControl::Drain
        } else {
            WorkerControl::Discard
        };
        debug!(?mode, outstanding = self.slots.outstanding(), "draining dispatch pipeline");
        let _ = session.control.send(mode);
        if let Err(err) = session.worker.await {
            warn!(error = %err, "dispatch worker ended abnormally");
        }

        if session.announced {
            info!("controller stopped");
            self.hub.notifier().emit(Notification::ControllerStopped);
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.intake.close();
        if let Some(session) = lock_or_recover(&self.inner).session.take() {
            session.worker.abort();
        }
    }
}
