use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

/// Structured event record handed to the observability backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThrottleEvent {
    pub title: String,
    pub text: String,
    pub tags: Vec<String>,
}

impl ThrottleEvent {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        ThrottleEvent {
            title: title.into(),
            text: text.into(),
            tags: vec!["name:autothrottle".to_string()],
        }
    }
}

/// Destination for throttle events. Emission is best-effort; failures are
/// logged and never propagate into the control loop.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: ThrottleEvent);
}

/// Writes events to the service log.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn emit(&self, event: ThrottleEvent) {
        info!(title = %event.title, text = %event.text, "throttle event");
    }
}

/// POSTs events as JSON to an external webhook, logging them as well.
pub struct WebhookSink {
    url: String,
    http: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: String) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()?;
        Ok(WebhookSink { url, http })
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    async fn emit(&self, event: ThrottleEvent) {
        info!(title = %event.title, text = %event.text, "throttle event");
        if let Err(e) = self.http.post(&self.url).json(&event).send().await {
            warn!(error = %e, "failed to post throttle event to webhook");
        }
    }
}
