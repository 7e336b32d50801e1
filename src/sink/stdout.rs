use std::io::Write;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::types::{AggregatedSnapshot, EmittedAlert, Priority};
use super::AlertSink;

/// Outbound line shape, one tagged object per line
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent<'a> {
    Alert {
        instance: &'a str,
        #[serde(flatten)]
        alert: &'a EmittedAlert,
    },
    Snapshot {
        instance: &'a str,
        #[serde(flatten)]
        snapshot: &'a AggregatedSnapshot,
    },
}

/// JSON lines on standard output
pub struct StdoutSink {
    instance: String,
}

impl StdoutSink {
    pub fn new(instance: &str) -> Self {
        Self {
            instance: instance.to_string(),
        }
    }

    fn write_lines(&self, events: &[OutboundEvent<'_>]) -> Result<()> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for event in events {
            serde_json::to_writer(&mut out, event)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(())
    }
}

#[async_trait]
impl AlertSink for StdoutSink {
    fn name(&self) -> &str { "stdout" }

    fn accepts(&self, _priority: &Priority) -> bool {
        true
    }

    async fn send_alerts(&self, alerts: &[EmittedAlert]) -> Result<()> {
        let events: Vec<OutboundEvent<'_>> = alerts
            .iter()
            .map(|alert| OutboundEvent::Alert {
                instance: &self.instance,
                alert,
            })
            .collect();
        self.write_lines(&events)
    }

    async fn send_snapshot(&self, snapshot: &AggregatedSnapshot) -> Result<()> {
        self.write_lines(&[OutboundEvent::Snapshot {
            instance: &self.instance,
            snapshot,
        }])
    }
}
