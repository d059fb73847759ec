#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dirwatch::engine::Controller;
use dirwatch::events::{Notification, NotificationHub};
use dirwatch::types::CancelReason;

/// Collects every notification a controller (or hub) delivers.
#[derive(Debug, Clone, Default)]
pub struct NotificationRecorder {
    seen: Arc<Mutex<Vec<Notification>>>,
}

impl NotificationRecorder {
    pub fn attach(controller: &Controller) -> Self {
        let recorder = Self::default();
        let seen = Arc::clone(&recorder.seen);
        controller.subscribe(move |n| seen.lock().unwrap().push(n.clone()));
        recorder
    }

    pub fn attach_hub(hub: &NotificationHub) -> Self {
        let recorder = Self::default();
        let seen = Arc::clone(&recorder.seen);
        hub.subscribe(move |n| seen.lock().unwrap().push(n.clone()));
        recorder
    }

    pub fn all(&self) -> Vec<Notification> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Notification) -> bool) -> usize {
        self.seen.lock().unwrap().iter().filter(|n| pred(n)).count()
    }

    pub fn cancellations(&self) -> Vec<(PathBuf, CancelReason)> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|n| match n {
                Notification::TaskCanceled { path, reason, .. } => Some((path.clone(), *reason)),
                _ => None,
            })
            .collect()
    }

    /// Wait until some recorded notification satisfies `pred`.
    pub async fn wait_for(
        &self,
        limit: Duration,
        pred: impl Fn(&Notification) -> bool,
    ) -> bool {
        crate::eventually(limit, || self.count(&pred) > 0).await
    }
}
