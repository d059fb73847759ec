// src/exec/sink.rs

//! Remote action sink seam.
//!
//! The transport is supplied by the embedding application through a
//! [`SinkConnector`]; this module only builds requests and keeps one
//! connection per endpoint.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use anyhow::Context;
use tracing::debug;

use crate::config::SinkAction;
use crate::fs::FileSystem;
use crate::sync::lock_or_recover;
use crate::types::{ChangeEvent, ChangeKind, DaemonName, EventId};

/// Everything a sink learns about one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkRequest {
    pub kind: ChangeKind,
    pub daemon: DaemonName,
    pub timestamp: SystemTime,
    pub file_name: String,
    pub path: PathBuf,
    pub old_path: Option<PathBuf>,
    pub id: EventId,
    pub host: String,
    /// BLAKE3 hex digest; only set when content is streamed.
    pub content_hash: Option<String>,
}

impl SinkRequest {
    pub fn from_event(event: &ChangeEvent, host: impl Into<String>) -> Self {
        Self {
            kind: event.kind,
            daemon: event.daemon.clone(),
            timestamp: event.timestamp,
            file_name: event.file_name(),
            path: event.path.clone(),
            old_path: event.old_path.clone(),
            id: event.id,
            host: host.into(),
            content_hash: None,
        }
    }
}

/// File bytes streamed alongside a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkContent {
    pub bytes: Vec<u8>,
    pub length: u64,
    pub hash: String,
}

impl SinkContent {
    pub fn new(bytes: Vec<u8>) -> Self {
        let hash = blake3::hash(&bytes).to_hex().to_string();
        Self {
            length: bytes.len() as u64,
            bytes,
            hash,
        }
    }
}

pub type SinkFuture = Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'static>>;

/// A connected remote sink. Resolves to the sink's acknowledgement text.
pub trait ActionSink: Send + Sync {
    fn submit(&self, request: SinkRequest, content: Option<SinkContent>) -> SinkFuture;
}

/// Creates sink proxies for endpoints.
pub trait SinkConnector: Send + Sync {
    fn connect(&self, endpoint: &str) -> anyhow::Result<Arc<dyn ActionSink>>;
}

/// Host name reported in requests.
pub fn host_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Connection cache plus request building.
pub struct SinkClient {
    connector: Option<Arc<dyn SinkConnector>>,
    connections: Mutex<HashMap<String, Arc<dyn ActionSink>>>,
    host: String,
}

impl std::fmt::Debug for SinkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkClient")
            .field("has_connector", &self.connector.is_some())
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl SinkClient {
    pub fn new(connector: Option<Arc<dyn SinkConnector>>) -> Self {
        Self {
            connector,
            connections: Mutex::new(HashMap::new()),
            host: host_name(),
        }
    }

    fn sink_for(&self, endpoint: &str) -> anyhow::Result<Arc<dyn ActionSink>> {
        let mut connections = lock_or_recover(&self.connections);
        if let Some(sink) = connections.get(endpoint) {
            return Ok(Arc::clone(sink));
        }
        let connector = self
            .connector
            .as_ref()
            .context("no action sink connector is configured")?;
        let sink = connector
            .connect(endpoint)
            .with_context(|| format!("connecting to action sink '{endpoint}'"))?;
        debug!(endpoint, "action sink connected");
        connections.insert(endpoint.to_string(), Arc::clone(&sink));
        Ok(sink)
    }

    /// Build the request (reading the file when streaming) and submit it.
    pub async fn submit(
        &self,
        action: &SinkAction,
        event: &ChangeEvent,
        fs: Arc<dyn FileSystem>,
    ) -> anyhow::Result<String> {
        let sink = self.sink_for(&action.endpoint)?;
        let mut request = SinkRequest::from_event(event, self.host.clone());

        let content = if action.stream_content {
            let path = event.path.clone();
            let bytes = tokio::task::spawn_blocking(move || fs.read(&path))
                .await
                .context("reading file content for the action sink")??;
            let content = SinkContent::new(bytes);
            request.content_hash = Some(content.hash.clone());
            Some(content)
        } else {
            None
        };

        sink.submit(request, content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;

    #[derive(Default)]
    struct Capture {
        seen: Mutex<Vec<(SinkRequest, Option<SinkContent>)>>,
    }

    impl ActionSink for Capture {
        fn submit(&self, request: SinkRequest, content: Option<SinkContent>) -> SinkFuture {
            let name = request.file_name.clone();
            self.seen.lock().unwrap().push((request, content));
            Box::pin(async move { Ok(format!("ack {name}")) })
        }
    }

    struct OneSink(Arc<Capture>);

    impl SinkConnector for OneSink {
        fn connect(&self, endpoint: &str) -> anyhow::Result<Arc<dyn ActionSink>> {
            anyhow::ensure!(endpoint == "mem://ok", "unreachable endpoint {endpoint}");
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn streams_content_with_blake3_hash() {
        let capture = Arc::new(Capture::default());
        let client = SinkClient::new(Some(Arc::new(OneSink(capture.clone()))));
        let fs = MockFileSystem::new();
        fs.add_file("/in/a.csv", "hello");
        let action = SinkAction {
            endpoint: "mem://ok".into(),
            stream_content: true,
        };
        let event = ChangeEvent::new("d", ChangeKind::Created, "/in/a.csv");

        let ack = client.submit(&action, &event, Arc::new(fs)).await.unwrap();
        assert_eq!(ack, "ack a.csv");

        let seen = capture.seen.lock().unwrap();
        let (request, content) = &seen[0];
        let content = content.as_ref().unwrap();
        let expected = blake3::hash(b"hello").to_hex().to_string();
        assert_eq!(content.length, 5);
        assert_eq!(content.hash, expected);
        assert_eq!(request.content_hash.as_deref(), Some(expected.as_str()));
        assert_eq!(request.id, event.id);
    }

    #[tokio::test]
    async fn missing_connector_and_bad_endpoint_fail() {
        let action = SinkAction {
            endpoint: "mem://down".into(),
            stream_content: false,
        };
        let event = ChangeEvent::new("d", ChangeKind::Created, "/in/a.csv");
        let fs: Arc<dyn FileSystem> = Arc::new(MockFileSystem::new());

        let none = SinkClient::new(None);
        assert!(none.submit(&action, &event, fs.clone()).await.is_err());

        let client = SinkClient::new(Some(Arc::new(OneSink(Arc::default()))));
        assert!(client.submit(&action, &event, fs).await.is_err());
    }
}
