//! Lifecycle event publication.
//!
//! The pipeline publishes fire-and-forget events through a narrow outbound
//! port so the core stays testable in isolation. Consumers are external
//! collaborators (notification or audit systems); a failing consumer never
//! affects the pipeline.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ImportEvent {
    Uploaded {
        job_id: Uuid,
        original_name: String,
        total_rows: u64,
    },
    Validated {
        job_id: Uuid,
        valid_rows: u64,
        error_rows: u64,
        warning_rows: u64,
        validation_passed: bool,
    },
    Progress {
        job_id: Uuid,
        processed_rows: u64,
        total_rows: u64,
        progress_percentage: f64,
    },
    Completed {
        job_id: Uuid,
        total_rows: u64,
        duration_seconds: f64,
    },
    Failed {
        job_id: Uuid,
        error: String,
    },
    Cancelled {
        job_id: Uuid,
        processed_rows: u64,
    },
    Deleted {
        job_id: Uuid,
    },
}

impl ImportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ImportEvent::Uploaded { .. } => "uploaded",
            ImportEvent::Validated { .. } => "validated",
            ImportEvent::Progress { .. } => "progress",
            ImportEvent::Completed { .. } => "completed",
            ImportEvent::Failed { .. } => "failed",
            ImportEvent::Cancelled { .. } => "cancelled",
            ImportEvent::Deleted { .. } => "deleted",
        }
    }

    pub fn payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({"event": self.name()}))
    }
}

/// Outbound event port. Implementations must swallow their own failures.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: ImportEvent);
}

pub type EventReceiver = broadcast::Receiver<ImportEvent>;

/// In-process fan-out over a broadcast channel. Dropped when no subscriber
/// is listening, which is the fire-and-forget contract.
pub struct BroadcastEventSink {
    tx: broadcast::Sender<ImportEvent>,
}

impl BroadcastEventSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1000);
        Self { tx }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn publish(&self, event: ImportEvent) {
        debug!("Publishing event '{}'", event.name());
        let _ = self.tx.send(event);
    }
}

/// Posts each event to a configured webhook. Delivery runs detached so a
/// slow or broken endpoint cannot stall a processing worker.
pub struct WebhookEventSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookEventSink {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl EventSink for WebhookEventSink {
    async fn publish(&self, event: ImportEvent) {
        let client = self.client.clone();
        let url = self.url.clone();
        let payload = event.payload();
        let name = event.name();

        tokio::spawn(async move {
            if let Err(e) = client.post(&url).json(&payload).send().await {
                warn!("Webhook delivery of '{}' event failed: {}", name, e);
            }
        });
    }
}

/// Fans one event out to several sinks.
pub struct CompositeEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl CompositeEventSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl EventSink for CompositeEventSink {
    async fn publish(&self, event: ImportEvent) {
        for sink in &self.sinks {
            sink.publish(event.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_sink_delivers_to_subscribers() {
        let sink = BroadcastEventSink::new();
        let mut rx = sink.subscribe();

        let job_id = Uuid::new_v4();
        sink.publish(ImportEvent::Uploaded {
            job_id,
            original_name: "prices.csv".to_string(),
            total_rows: 3,
        })
        .await;

        match rx.recv().await.unwrap() {
            ImportEvent::Uploaded {
                job_id: got,
                total_rows,
                ..
            } => {
                assert_eq!(got, job_id);
                assert_eq!(total_rows, 3);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn publish_without_subscriber_is_silent() {
        let sink = BroadcastEventSink::new();
        sink.publish(ImportEvent::Deleted {
            job_id: Uuid::new_v4(),
        })
        .await;
    }

    #[test]
    fn payload_carries_event_name() {
        let event = ImportEvent::Failed {
            job_id: Uuid::new_v4(),
            error: "boom".to_string(),
        };
        let payload = event.payload();
        assert_eq!(payload["event"], "failed");
        assert_eq!(payload["error"], "boom");
    }
}
