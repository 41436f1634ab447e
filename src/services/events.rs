//! Activity/notification sink.
//!
//! Billing and capacity outcomes are emitted as fire-and-forget events for
//! user-visible activity feeds. A sink failure must never abort billing, so
//! the trait is infallible from the caller's perspective; implementations
//! swallow and log their own errors.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use uuid::Uuid;

/// One activity event.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEvent {
    pub subject_id: Uuid,
    pub event_type: String,
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ActivityEvent {
    pub fn new(subject_id: Uuid, event_type: &str, status: &str, message: String) -> Self {
        Self {
            subject_id,
            event_type: event_type.to_string(),
            status: status.to_string(),
            message,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Outbound event boundary.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn record(&self, event: ActivityEvent);
}

/// HTTP client for the activity/notification service.
#[derive(Clone)]
pub struct HttpActivitySink {
    client: Client,
    base_url: String,
}

impl HttpActivitySink {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ActivitySink for HttpActivitySink {
    async fn record(&self, event: ActivityEvent) {
        let url = format!("{}/activity", self.base_url);
        match self.client.post(&url).json(&event).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::warn!(
                    status = %response.status(),
                    event_type = %event.event_type,
                    subject_id = %event.subject_id,
                    "Activity sink rejected event"
                );
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    event_type = %event.event_type,
                    subject_id = %event.subject_id,
                    "Failed to deliver activity event"
                );
            }
        }
    }
}
