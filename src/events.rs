// src/events.rs

//! Outward notification stream.
//!
//! Watchers, the dispatch worker and action runners all emit
//! [`Notification`]s through a cloneable [`Notifier`]. A single delivery task
//! owned by the [`NotificationHub`] drains the channel and invokes every
//! subscriber, so subscribers never see two notifications concurrently and
//! always see them in emission order.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::sync::lock_or_recover;
use crate::types::{
    CancelReason, ChangeEvent, DaemonName, EventId, ProcessErrorKind, RecycleReason,
    WatcherState,
};

/// Everything the core reports to logging/UI collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    WatcherStateChanged {
        daemon: DaemonName,
        state: WatcherState,
    },
    WatcherStarted {
        daemon: DaemonName,
    },
    WatcherStopped {
        daemon: DaemonName,
    },
    /// A change survived filtering and was handed to the dispatch queue.
    ChangeDetected(ChangeEvent),
    WatchError {
        daemon: DaemonName,
        message: String,
    },
    Recycled {
        daemon: DaemonName,
        reason: RecycleReason,
    },
    SearchProgress {
        daemon: DaemonName,
        directory: PathBuf,
    },
    SearchError {
        daemon: DaemonName,
        directory: PathBuf,
        message: String,
    },
    TaskCanceled {
        daemon: DaemonName,
        id: EventId,
        path: PathBuf,
        reason: CancelReason,
    },
    ProcessStarted {
        daemon: DaemonName,
        id: EventId,
        pid: Option<u32>,
        command_line: String,
        started_at: SystemTime,
    },
    ProcessOutput {
        daemon: DaemonName,
        pid: Option<u32>,
        line: String,
    },
    ProcessErrorOutput {
        daemon: DaemonName,
        pid: Option<u32>,
        line: String,
    },
    ProcessExited {
        daemon: DaemonName,
        id: EventId,
        pid: Option<u32>,
        exit_code: Option<i32>,
        exited_at: SystemTime,
    },
    ProcessError {
        daemon: DaemonName,
        id: EventId,
        path: PathBuf,
        kind: ProcessErrorKind,
        message: String,
    },
    ServiceResponse {
        daemon: DaemonName,
        id: EventId,
        message: String,
    },
    ServiceError {
        daemon: DaemonName,
        id: EventId,
        path: PathBuf,
        message: String,
    },
    ControllerStarted,
    ControllerStopped,
}

enum Envelope {
    Deliver(Notification),
    Flush(oneshot::Sender<()>),
}

/// Cheap handle used by producers to emit notifications.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}

impl Notifier {
    pub fn emit(&self, notification: Notification) {
        if self.tx.send(Envelope::Deliver(notification)).is_err() {
            trace!("notification hub closed; dropping notification");
        }
    }
}

pub type Subscriber = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Owner of the delivery task and the subscriber list.
pub struct NotificationHub {
    notifier: Notifier,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    worker: JoinHandle<()>,
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHub").finish_non_exhaustive()
    }
}

impl NotificationHub {
    /// Create the hub and spawn its delivery task on the current Tokio runtime.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let subscribers: Arc<Mutex<Vec<Subscriber>>> = Arc::new(Mutex::new(Vec::new()));

        let subs = Arc::clone(&subscribers);
        let worker = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                match envelope {
                    Envelope::Deliver(notification) => {
                        log_notification(&notification);
                        // Snapshot so a subscriber may subscribe others.
                        let current: Vec<Subscriber> = lock_or_recover(&subs).clone();
                        for subscriber in current {
                            subscriber(&notification);
                        }
                    }
                    Envelope::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("notification delivery loop finished");
        });

        Self {
            notifier: Notifier { tx },
            subscribers,
            worker,
        }
    }

    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    pub fn subscribe(&self, subscriber: impl Fn(&Notification) + Send + Sync + 'static) {
        lock_or_recover(&self.subscribers).push(Arc::new(subscriber));
    }

    /// Subscribe through a channel instead of a callback.
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(move |n| {
            let _ = tx.send(n.clone());
        });
        rx
    }

    /// Wait until every notification emitted before this call was delivered.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.notifier.tx.send(Envelope::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NotificationHub {
    fn drop(&mut self) {
        // Producers may still hold notifiers; the task would otherwise idle forever.
        self.worker.abort();
    }
}

fn log_notification(n: &Notification) {
    match n {
        Notification::WatchError { daemon, message } => {
            warn!(daemon = %daemon, %message, "watch error");
        }
        Notification::SearchError {
            daemon,
            directory,
            message,
        } => {
            warn!(daemon = %daemon, directory = ?directory, %message, "search error");
        }
        Notification::TaskCanceled {
            daemon,
            id,
            path,
            reason,
        } => {
            warn!(daemon = %daemon, id, path = ?path, reason = reason.code(), "task canceled");
        }
        Notification::ProcessError {
            daemon,
            id,
            path,
            kind,
            message,
        } => {
            warn!(daemon = %daemon, id, path = ?path, ?kind, %message, "process error");
        }
        Notification::ServiceError {
            daemon,
            id,
            path,
            message,
        } => {
            warn!(daemon = %daemon, id, path = ?path, %message, "service error");
        }
        Notification::Recycled { daemon, reason } => {
            info!(daemon = %daemon, ?reason, "watcher recycled");
        }
        Notification::WatcherStarted { daemon } => info!(daemon = %daemon, "watcher started"),
        Notification::WatcherStopped { daemon } => info!(daemon = %daemon, "watcher stopped"),
        Notification::ControllerStarted => info!("controller started"),
        Notification::ControllerStopped => info!("controller stopped"),
        Notification::ProcessStarted {
            daemon,
            id,
            pid,
            command_line,
            ..
        } => {
            info!(daemon = %daemon, id, ?pid, %command_line, "process started");
        }
        Notification::ProcessExited {
            daemon,
            id,
            pid,
            exit_code,
            ..
        } => {
            info!(daemon = %daemon, id, ?pid, ?exit_code, "process exited");
        }
        Notification::ProcessOutput { daemon, pid, line } => {
            debug!(daemon = %daemon, ?pid, "stdout: {}", line);
        }
        Notification::ProcessErrorOutput { daemon, pid, line } => {
            debug!(daemon = %daemon, ?pid, "stderr: {}", line);
        }
        other => debug!(notification = ?other, "notification"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_notifications_in_emission_order() {
        let hub = NotificationHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        hub.subscribe(move |n| {
            if let Notification::WatcherStarted { daemon } = n {
                sink.lock().unwrap().push(daemon.clone());
            }
        });

        let notifier = hub.notifier();
        for i in 0..50 {
            notifier.emit(Notification::WatcherStarted {
                daemon: format!("d{i}"),
            });
        }
        hub.flush().await;

        let seen = seen.lock().unwrap();
        let expected: Vec<String> = (0..50).map(|i| format!("d{i}")).collect();
        assert_eq!(*seen, expected);
    }

    #[tokio::test]
    async fn callbacks_never_overlap() {
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

        let hub = NotificationHub::new();
        let busy = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));
        {
            let busy = Arc::clone(&busy);
            let overlaps = Arc::clone(&overlaps);
            hub.subscribe(move |_| {
                if busy.swap(true, Ordering::SeqCst) {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::sleep(std::time::Duration::from_micros(200));
                busy.store(false, Ordering::SeqCst);
            });
        }

        let mut producers = Vec::new();
        for _ in 0..4 {
            let notifier = hub.notifier();
            producers.push(tokio::spawn(async move {
                for _ in 0..20 {
                    notifier.emit(Notification::ControllerStarted);
                }
            }));
        }
        for p in producers {
            p.await.unwrap();
        }
        hub.flush().await;

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }
}
