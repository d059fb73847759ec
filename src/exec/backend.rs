// src/exec/backend.rs

//! Pluggable action backend abstraction.
//!
//! The dispatch worker talks to an `ActionBackend` instead of spawning
//! processes itself. This makes it easy to swap in a fake backend in tests
//! while keeping the production implementation in [`RealActionBackend`].
//!
//! - `RealActionBackend` runs process actions through [`ActionRunner`] and
//!   sink actions through [`SinkClient`].
//! - Tests can provide their own `ActionBackend` that, for example, records
//!   which events were dispatched and how many ran at once.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::config::{ActionConfig, WatcherConfig};
use crate::events::{Notification, Notifier};
use crate::exec::runner::ActionRunner;
use crate::exec::sink::{SinkClient, SinkConnector};
use crate::fs::FileSystem;
use crate::types::{ChangeEvent, ProcessErrorKind};

/// Why an action could not be carried out.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("{message}")]
    Process {
        kind: ProcessErrorKind,
        message: String,
    },

    #[error("{0}")]
    Service(String),
}

/// Resolves when the action is finished (process exited, sink answered).
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<(), ActionError>> + Send + 'static>>;

/// Trait abstracting how a dispatched change is acted upon.
///
/// Production code uses [`RealActionBackend`]; tests can provide their own
/// implementation that doesn't spawn real processes.
pub trait ActionBackend: Send + Sync {
    /// Start the action for `event`. The returned future must own
    /// everything it needs; the dispatch worker may spawn it.
    fn execute(&self, daemon: Arc<WatcherConfig>, event: ChangeEvent) -> ActionFuture;
}

/// Real action backend used in production.
pub struct RealActionBackend {
    runner: ActionRunner,
    sinks: Arc<SinkClient>,
    fs: Arc<dyn FileSystem>,
    notifier: Notifier,
}

impl std::fmt::Debug for RealActionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealActionBackend").finish_non_exhaustive()
    }
}

impl RealActionBackend {
    pub fn new(
        notifier: Notifier,
        fs: Arc<dyn FileSystem>,
        connector: Option<Arc<dyn SinkConnector>>,
    ) -> Self {
        Self {
            runner: ActionRunner::new(notifier.clone()),
            sinks: Arc::new(SinkClient::new(connector)),
            fs,
            notifier,
        }
    }
}

impl ActionBackend for RealActionBackend {
    fn execute(&self, daemon: Arc<WatcherConfig>, event: ChangeEvent) -> ActionFuture {
        match &daemon.action {
            ActionConfig::Process(action) => {
                let runner = self.runner.clone();
                let action = action.clone();
                Box::pin(async move { runner.run(&action, &event).await })
            }
            ActionConfig::Sink(action) => {
                let sinks = Arc::clone(&self.sinks);
                let fs = Arc::clone(&self.fs);
                let notifier = self.notifier.clone();
                let action = action.clone();
                Box::pin(async move {
                    let message = sinks
                        .submit(&action, &event, fs)
                        .await
                        .map_err(|err| ActionError::Service(format!("{err:#}")))?;
                    debug!(daemon = %event.daemon, id = event.id, %message, "action sink acknowledged");
                    notifier.emit(Notification::ServiceResponse {
                        daemon: event.daemon.clone(),
                        id: event.id,
                        message,
                    });
                    Ok(())
                })
            }
        }
    }
}
