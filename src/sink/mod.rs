pub mod stdout;
pub mod webhook;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::channel::ChannelOutput;
use crate::config::SinkConfig;
use crate::types::{AggregatedSnapshot, EmittedAlert, Priority};

/// Trait for outbound delivery targets
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    /// Check if this sink wants alerts of the given priority
    fn accepts(&self, priority: &Priority) -> bool;

    async fn send_alerts(&self, alerts: &[EmittedAlert]) -> Result<()>;

    async fn send_snapshot(&self, _snapshot: &AggregatedSnapshot) -> Result<()> {
        Ok(())
    }
}

/// Fans channel outputs out to every configured sink
pub struct Dispatcher {
    sinks: Vec<Box<dyn AlertSink>>,
    snapshots: bool,
    delivered: u64,
}

impl Dispatcher {
    pub fn new(config: &SinkConfig, instance: &str) -> Result<Self> {
        let mut sinks: Vec<Box<dyn AlertSink>> = Vec::new();

        if config.stdout {
            sinks.push(Box::new(stdout::StdoutSink::new(instance)));
        }

        if let Some(ref wc) = config.webhook {
            if wc.enabled {
                sinks.push(Box::new(webhook::WebhookSink::new(wc, instance)?));
            }
        }

        tracing::info!(sinks = sinks.len(), "Initialized output sinks");

        Ok(Self::with_sinks(sinks, config.snapshots))
    }

    pub fn with_sinks(sinks: Vec<Box<dyn AlertSink>>, snapshots: bool) -> Self {
        Self {
            sinks,
            snapshots,
            delivered: 0,
        }
    }

    /// Alerts at least one sink accepted and sent successfully
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Deliver one worker output. Sink failures are logged and skipped.
    pub async fn dispatch(&mut self, output: ChannelOutput) {
        match output {
            ChannelOutput::Snapshot(snapshot) => {
                if !self.snapshots {
                    return;
                }
                for sink in &self.sinks {
                    if let Err(e) = sink.send_snapshot(&snapshot).await {
                        tracing::error!(sink = sink.name(), error = %e, "Failed to send snapshot");
                    }
                }
            }
            ChannelOutput::Alerts(alerts) => {
                let mut sent: HashSet<Uuid> = HashSet::new();
                for sink in &self.sinks {
                    let accepted: Vec<EmittedAlert> = alerts
                        .iter()
                        .filter(|a| sink.accepts(&a.priority))
                        .cloned()
                        .collect();
                    if accepted.is_empty() {
                        continue;
                    }
                    match sink.send_alerts(&accepted).await {
                        Ok(()) => sent.extend(accepted.iter().map(|a| a.id)),
                        Err(e) => tracing::error!(
                            sink = sink.name(),
                            count = accepted.len(),
                            error = %e,
                            "Failed to send alerts"
                        ),
                    }
                }
                if sent.len() < alerts.len() {
                    tracing::warn!(dropped = alerts.len() - sent.len(), "Alerts reached no sink");
                }
                self.delivered += sent.len() as u64;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::types::{AlertTone, DetectorKind};

    #[derive(Clone, Default)]
    struct Recording {
        alerts: Arc<Mutex<Vec<EmittedAlert>>>,
        snapshots: Arc<Mutex<usize>>,
        only_high: bool,
        fail: bool,
    }

    #[async_trait]
    impl AlertSink for Recording {
        fn name(&self) -> &str { "recording" }

        fn accepts(&self, priority: &Priority) -> bool {
            !self.only_high || *priority == Priority::High
        }

        async fn send_alerts(&self, alerts: &[EmittedAlert]) -> Result<()> {
            if self.fail {
                anyhow::bail!("sink offline");
            }
            self.alerts.lock().unwrap().extend_from_slice(alerts);
            Ok(())
        }

        async fn send_snapshot(&self, _snapshot: &AggregatedSnapshot) -> Result<()> {
            *self.snapshots.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn alert(priority: Priority) -> EmittedAlert {
        EmittedAlert {
            id: Uuid::new_v4(),
            channel: "c".into(),
            kind: DetectorKind::SpamWarning,
            message: "spam".into(),
            tone: AlertTone::Negative,
            priority,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn filters_by_priority_and_survives_failures() {
        let all = Recording::default();
        let high = Recording { only_high: true, ..Default::default() };
        let broken = Recording { fail: true, ..Default::default() };
        let mut dispatcher = Dispatcher::with_sinks(
            vec![Box::new(broken), Box::new(all.clone()), Box::new(high.clone())],
            false,
        );

        dispatcher
            .dispatch(ChannelOutput::Alerts(vec![alert(Priority::Low), alert(Priority::High)]))
            .await;
        dispatcher
            .dispatch(ChannelOutput::Snapshot(AggregatedSnapshot::empty("c", Utc::now())))
            .await;

        assert_eq!(all.alerts.lock().unwrap().len(), 2);
        assert_eq!(high.alerts.lock().unwrap().len(), 1);
        assert_eq!(*all.snapshots.lock().unwrap(), 0);
        assert_eq!(dispatcher.delivered(), 2);
    }

    #[tokio::test]
    async fn delivered_counts_only_successful_sends() {
        let high = Recording { only_high: true, ..Default::default() };
        let broken = Recording { fail: true, ..Default::default() };
        let mut dispatcher = Dispatcher::with_sinks(vec![Box::new(broken), Box::new(high.clone())], false);

        dispatcher
            .dispatch(ChannelOutput::Alerts(vec![alert(Priority::Low), alert(Priority::High)]))
            .await;
        assert_eq!(high.alerts.lock().unwrap().len(), 1);
        assert_eq!(dispatcher.delivered(), 1);

        let mut nobody = Dispatcher::with_sinks(vec![Box::new(Recording { fail: true, ..Default::default() })], false);
        nobody.dispatch(ChannelOutput::Alerts(vec![alert(Priority::High)])).await;
        assert_eq!(nobody.delivered(), 0);
    }
}
