//! Removal event sinks. Emission failures are reported to the caller, which
//! logs them and carries on.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::json;

use crate::core::errors::{EraserError, Result};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::state::api::ApiClient;

/// Event source component name.
pub const COMPONENT: &str = "eraser";
/// Event reason for a removed image.
pub const REASON_REMOVED: &str = "Removed";

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn image_removed(&self, node: &str, digest: &str, reference: &str) -> Result<()>;
}

fn removal_message(digest: &str, reference: &str) -> String {
    if reference.is_empty() || reference == digest {
        format!("successfully removed image {digest}")
    } else {
        format!("successfully removed image {reference} ({digest})")
    }
}

// ──────────────────── cluster API ────────────────────

/// Creates `core/v1` Events against the `Node` object.
#[derive(Debug, Clone)]
pub struct ApiEventSink {
    client: ApiClient,
    namespace: String,
}

impl ApiEventSink {
    pub fn new(client: ApiClient, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    #[must_use]
    pub fn event_body(&self, node: &str, digest: &str, reference: &str) -> serde_json::Value {
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        json!({
            "apiVersion": "v1",
            "kind": "Event",
            "metadata": {
                "generateName": format!("{node}."),
                "namespace": self.namespace,
                "annotations": {"eraser.sh/digest": digest},
            },
            "involvedObject": {"apiVersion": "v1", "kind": "Node", "name": node},
            "reason": REASON_REMOVED,
            "message": removal_message(digest, reference),
            "type": "Normal",
            "source": {"component": COMPONENT, "host": node},
            "firstTimestamp": now,
            "lastTimestamp": now,
            "count": 1,
        })
    }
}

#[async_trait]
impl EventSink for ApiEventSink {
    async fn image_removed(&self, node: &str, digest: &str, reference: &str) -> Result<()> {
        let path = format!("/api/v1/namespaces/{}/events", self.namespace);
        let body = self.event_body(node, digest, reference);
        let response = self
            .client
            .request(Method::POST, &path, "application/json", Some(&body))
            .await?;
        if response.status.is_success() {
            Ok(())
        } else {
            Err(EraserError::Connection {
                target: format!("{}{path}", self.client.server()),
                details: format!("event create returned {}", response.status),
            })
        }
    }
}

// ──────────────────── activity log ────────────────────

/// Writes removal events to the activity log only.
#[derive(Clone)]
pub struct LogEventSink {
    logger: ActivityLoggerHandle,
}

impl LogEventSink {
    pub fn new(logger: ActivityLoggerHandle) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl EventSink for LogEventSink {
    async fn image_removed(&self, _node: &str, digest: &str, reference: &str) -> Result<()> {
        self.logger.send(ActivityEvent::EventEmitted {
            digest: digest.to_string(),
            reference: reference.to_string(),
            reason: REASON_REMOVED.to_string(),
        });
        Ok(())
    }
}

// ──────────────────── recording ────────────────────

/// Records `(node, digest, reference)` triples; optionally fails every call.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<(String, String, String)>>,
    fail: bool,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every emission fails after being recorded.
    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<(String, String, String)> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn image_removed(&self, node: &str, digest: &str, reference: &str) -> Result<()> {
        self.events
            .lock()
            .push((node.to_string(), digest.to_string(), reference.to_string()));
        if self.fail {
            return Err(EraserError::Connection {
                target: "recording sink".to_string(),
                details: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}
