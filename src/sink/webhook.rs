use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use crate::config::WebhookConfig;
use crate::types::{EmittedAlert, Priority};
use super::AlertSink;

/// Custom webhook sink, one POST per alert batch
pub struct WebhookSink {
    url: String,
    instance: String,
    headers: std::collections::HashMap<String, String>,
    priority_filter: Vec<Priority>,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(config: &WebhookConfig, instance: &str) -> Result<Self> {
        Ok(Self {
            url: config.url.clone(),
            instance: instance.to_string(),
            headers: config.headers.clone(),
            priority_filter: config.priority_filter.clone(),
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &str { "webhook" }

    fn accepts(&self, priority: &Priority) -> bool {
        self.priority_filter.is_empty() || self.priority_filter.contains(priority)
    }

    async fn send_alerts(&self, alerts: &[EmittedAlert]) -> Result<()> {
        let items: Vec<_> = alerts
            .iter()
            .map(|alert| {
                json!({
                    "id": alert.id,
                    "channel": &alert.channel,
                    "kind": alert.kind.to_string(),
                    "priority": alert.priority.to_string(),
                    "tone": alert.tone,
                    "message": &alert.message,
                    "timestamp": alert.timestamp.to_rfc3339(),
                })
            })
            .collect();
        let payload = json!({
            "instance": &self.instance,
            "alerts": items,
        });

        let mut req = self.client.post(&self.url).json(&payload);
        for (k, v) in &self.headers {
            req = req.header(k, v);
        }

        req.send().await?.error_for_status()?;
        Ok(())
    }
}
