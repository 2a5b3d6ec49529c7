use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::notify::{AlertPayload, Notifier};

/// Delivers alerts as JSON POSTs to a configured webhook. A non-2xx
/// response is a failed delivery.
pub struct WebhookNotifier {
    http: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_alert(&self, payload: &AlertPayload) -> Result<()> {
        self.http
            .post(&self.url)
            .json(&json!({ "kind": "alert", "alert": payload }))
            .send()
            .await?
            .error_for_status()?;

        debug!(watch = %payload.watch_name, title = %payload.title, "alert delivered");
        Ok(())
    }

    async fn send_batch(&self, payloads: &[AlertPayload], watch_name: &str) -> Result<()> {
        self.http
            .post(&self.url)
            .json(&json!({
                "kind": "batch",
                "watch": watch_name,
                "count": payloads.len(),
                "alerts": payloads,
            }))
            .send()
            .await?
            .error_for_status()?;

        debug!(watch = %watch_name, count = payloads.len(), "batch alert delivered");
        Ok(())
    }
}
