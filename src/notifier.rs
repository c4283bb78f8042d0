//! Best-effort outbound notifications. Every send is an explicit detached
//! task with its own failure log; nothing here can touch the primary
//! response path or the retry semantics of the action that triggered it.

use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Notifier {
    client: Client,
    webhook_url: Option<String>,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .user_agent("fx-engine/0.3")
            .build()
            .unwrap_or_default();
        Self { client, webhook_url }
    }

    /// Fires an event at the configured webhook without waiting for it.
    pub fn notify(&self, event: &str, payload: Value) {
        let Some(url) = self.webhook_url.clone() else {
            return;
        };
        let client = self.client.clone();
        let event = event.to_string();
        tokio::spawn(async move {
            let body = serde_json::json!({ "event": event, "payload": payload });
            match client.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(target: "notifier", event, "notification delivered");
                }
                Ok(response) => {
                    warn!(target: "notifier", event, status = %response.status(), "notification rejected");
                }
                Err(e) => {
                    warn!(target: "notifier", event, error = %e, "notification failed");
                }
            }
        });
    }
}
