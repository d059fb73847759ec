// src/engine/runtime.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};

use crate::config::{ControllerOptions, WatcherConfig};
use crate::events::{Notification, Notifier};
use crate::exec::{ActionBackend, ActionError};
use crate::fs::FileSystem;
use crate::sync::lock_or_recover;
use crate::types::{CancelReason, ChangeEvent, DaemonName};

use super::pipeline::{Pipeline, Verdict};
use super::queue::DispatchQueue;
use super::slots::Slots;

/// What the controller wants the dispatch worker to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerControl {
    Run,
    /// Finish queued and in-flight work, then exit.
    Drain,
    /// Cancel everything still queued and exit at once.
    Discard,
}

/// Entry point of changes into the dispatch pipeline.
///
/// Shared by every watcher of a controller. Between sessions it is closed
/// and changes are dropped.
#[derive(Clone)]
pub(crate) struct Intake {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<ChangeEvent>>>>,
    slots: Arc<Slots>,
}

impl Intake {
    pub(crate) fn new(slots: Arc<Slots>) -> Self {
        Self {
            tx: Arc::new(Mutex::new(None)),
            slots,
        }
    }

    pub(crate) fn open(&self, tx: mpsc::UnboundedSender<ChangeEvent>) {
        *lock_or_recover(&self.tx) = Some(tx);
    }

    pub(crate) fn close(&self) {
        lock_or_recover(&self.tx).take();
    }

    pub(crate) fn is_open(&self) -> bool {
        lock_or_recover(&self.tx).is_some()
    }

    pub(crate) fn submit(&self, event: ChangeEvent) -> bool {
        let tx = lock_or_recover(&self.tx);
        let Some(tx) = tx.as_ref() else {
            trace!(daemon = %event.daemon, id = event.id, "dispatcher inactive; dropping change");
            return false;
        };
        self.slots.accept();
        if tx.send(event).is_err() {
            self.slots.settle();
            return false;
        }
        true
    }
}

/// Everything the worker needs besides its own queue.
pub(crate) struct WorkerContext {
    pub daemons: HashMap<DaemonName, Arc<WatcherConfig>>,
    pub fs: Arc<dyn FileSystem>,
    pub backend: Arc<dyn ActionBackend>,
    pub notifier: Notifier,
    pub slots: Arc<Slots>,
    pub options: ControllerOptions,
}

enum Gate {
    Open(Option<OwnedSemaphorePermit>),
    Discarding,
}

/// The single consumer of the dispatch queue.
///
/// Pulls tasks FIFO, runs them through the [`Pipeline`] and hands survivors
/// to the [`ActionBackend`]. Actions run in their own tasks; their
/// completion frees the slot and wakes the worker.
pub(crate) struct DispatchWorker {
    ctx: WorkerContext,
    pipeline: Pipeline,
    queue: DispatchQueue,
    inbox: mpsc::UnboundedReceiver<ChangeEvent>,
    inbox_open: bool,
    control: watch::Receiver<WorkerControl>,
    control_open: bool,
    wake: Arc<Notify>,
    /// Present in synchronized mode: one action at a time across daemons.
    gate: Option<Arc<Semaphore>>,
}

impl fmt::Debug for DispatchWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchWorker")
            .field("queued", &self.queue.len())
            .field("synchronized", &self.gate.is_some())
            .finish_non_exhaustive()
    }
}

/// Spawn the dispatch worker for one controller session.
pub(crate) fn spawn_dispatch_worker(
    ctx: WorkerContext,
    inbox: mpsc::UnboundedReceiver<ChangeEvent>,
    control: watch::Receiver<WorkerControl>,
) -> JoinHandle<()> {
    let worker = DispatchWorker {
        pipeline: Pipeline::new(Arc::clone(&ctx.fs), ctx.options.queue_limit),
        gate: ctx
            .options
            .synchronized_execution
            .then(|| Arc::new(Semaphore::new(1))),
        ctx,
        queue: DispatchQueue::new(),
        inbox,
        inbox_open: true,
        control,
        control_open: true,
        wake: Arc::new(Notify::new()),
    };
    tokio::spawn(worker.run())
}

impl DispatchWorker {
    /// Main loop.
    ///
    /// - Moves newly submitted changes to the back of the queue.
    /// - Pops one task and runs the pipeline on it.
    /// - Sleeps briefly once every queued task has been requeued without
    ///   progress, so a queue of waiting tasks does not spin.
    async fn run(mut self) {
        info!(
            daemons = self.ctx.daemons.len(),
            synchronized = self.gate.is_some(),
            "dispatch worker started"
        );
        let mut stalled = 0usize;

        loop {
            let mode = *self.control.borrow();
            if mode == WorkerControl::Discard {
                self.discard_all();
                break;
            }
            if self.absorb_inbox() > 0 {
                stalled = 0;
            }

            let Some(event) = self.queue.pop() else {
                if mode == WorkerControl::Drain && self.ctx.slots.in_flight() == 0 {
                    break;
                }
                self.wait_for_work(None).await;
                continue;
            };

            let Some(daemon) = self.ctx.daemons.get(&event.daemon).cloned() else {
                warn!(daemon = %event.daemon, id = event.id, "change for unknown daemon; dropping");
                self.ctx.slots.settle();
                continue;
            };

            let in_flight = self.ctx.slots.in_flight_for(&daemon.name);
            match self
                .pipeline
                .evaluate(&mut self.queue, &daemon, event, in_flight, SystemTime::now())
            {
                Verdict::Requeue(event, cause) => {
                    trace!(daemon = %event.daemon, id = event.id, ?cause, "requeued");
                    self.queue.push(event);
                    stalled += 1;
                    if stalled >= self.queue.len() {
                        stalled = 0;
                        self.wait_for_work(Some(self.ctx.options.idle_sleep)).await;
                    }
                }
                Verdict::Cancel(event, reason) => {
                    stalled = 0;
                    self.cancel(event, reason);
                }
                Verdict::Dispatch(event) => {
                    stalled = 0;
                    self.dispatch(daemon, event).await;
                }
            }
        }

        debug!(
            in_flight = self.ctx.slots.in_flight(),
            "dispatch worker finished"
        );
    }

    fn absorb_inbox(&mut self) -> usize {
        let mut absorbed = 0;
        while let Ok(event) = self.inbox.try_recv() {
            self.queue.push(event);
            absorbed += 1;
        }
        absorbed
    }

    /// Block until a change arrives, an action completes, the control value
    /// changes, or `limit` elapses.
    async fn wait_for_work(&mut self, limit: Option<std::time::Duration>) {
        let nap = async {
            match limit {
                Some(d) => sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            msg = self.inbox.recv(), if self.inbox_open => match msg {
                Some(event) => self.queue.push(event),
                None => self.inbox_open = false,
            },
            _ = self.wake.notified() => {}
            changed = self.control.changed(), if self.control_open => {
                if changed.is_err() {
                    self.control_open = false;
                }
            }
            _ = nap => {}
        }
    }

    fn cancel(&mut self, event: ChangeEvent, reason: CancelReason) {
        self.queue.forget(event.id);
        self.ctx.slots.settle();
        self.ctx.notifier.emit(Notification::TaskCanceled {
            daemon: event.daemon,
            id: event.id,
            path: event.path,
            reason,
        });
    }

    fn discard_all(&mut self) {
        self.absorb_inbox();
        let discarded = self.queue.drain();
        if !discarded.is_empty() {
            info!(tasks = discarded.len(), "discarding queued tasks");
        }
        for event in discarded {
            self.cancel(event, CancelReason::Discarded);
        }
    }

    async fn acquire_gate(&mut self) -> Gate {
        let Some(gate) = self.gate.clone() else {
            return Gate::Open(None);
        };
        loop {
            tokio::select! {
                permit = Arc::clone(&gate).acquire_owned() => {
                    // The semaphore is never closed.
                    return Gate::Open(permit.ok());
                }
                changed = self.control.changed(), if self.control_open => {
                    if changed.is_err() {
                        self.control_open = false;
                    }
                    if *self.control.borrow() == WorkerControl::Discard {
                        return Gate::Discarding;
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, daemon: Arc<WatcherConfig>, event: ChangeEvent) {
        let permit = match self.acquire_gate().await {
            Gate::Open(permit) => permit,
            Gate::Discarding => {
                self.queue.push_front(event);
                return;
            }
        };

        debug!(
            daemon = %daemon.name,
            id = event.id,
            kind = %event.kind,
            path = ?event.path,
            "dispatching action"
        );
        self.ctx.slots.reserve(&daemon.name);

        let action = self.ctx.backend.execute(Arc::clone(&daemon), event.clone());
        let notifier = self.ctx.notifier.clone();
        let slots = Arc::clone(&self.ctx.slots);
        let wake = Arc::clone(&self.wake);
        let handle = tokio::spawn(async move {
            if let Err(err) = action.await {
                report_failure(&notifier, &event, err);
            }
            slots.release(&event.daemon);
            drop(permit);
            wake.notify_one();
        });

        if daemon.action.waits_for_exit() {
            match daemon.action.max_wait() {
                Some(max) => {
                    if timeout(max, handle).await.is_err() {
                        debug!(daemon = %daemon.name, ?max, "stopped waiting for action; it keeps running");
                    }
                }
                None => {
                    let _ = handle.await;
                }
            }
        }
    }
}

fn report_failure(notifier: &Notifier, event: &ChangeEvent, err: ActionError) {
    let notification = match err {
        ActionError::Process { kind, message } => Notification::ProcessError {
            daemon: event.daemon.clone(),
            id: event.id,
            path: event.path.clone(),
            kind,
            message,
        },
        ActionError::Service(message) => Notification::ServiceError {
            daemon: event.daemon.clone(),
            id: event.id,
            path: event.path.clone(),
            message,
        },
    };
    notifier.emit(notification);
}
