use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::SpikeConfig;
use crate::types::{BaselineSnapshot, MetricId, SpikeEvent};

/// Ratio-to-baseline spike detection with a re-arm interval.
/// An unready baseline demands a larger relative move before firing.
pub struct SpikeDetector {
    ready_threshold: f64,
    warmup_threshold: f64,
    rearm: Duration,
    capacity: usize,
    last_emitted_at: Option<DateTime<Utc>>,
    history: VecDeque<SpikeEvent>,
}

impl SpikeDetector {
    pub fn new(config: &SpikeConfig) -> Self {
        Self {
            ready_threshold: config.ready_threshold,
            warmup_threshold: config.warmup_threshold,
            rearm: Duration::seconds(config.rearm_secs),
            capacity: config.history,
            last_emitted_at: None,
            history: VecDeque::with_capacity(config.history),
        }
    }

    pub fn threshold(&self, baseline: &BaselineSnapshot) -> f64 {
        if baseline.ready {
            self.ready_threshold
        } else {
            self.warmup_threshold
        }
    }

    pub fn evaluate(
        &mut self,
        metric: MetricId,
        value: f64,
        baseline: &BaselineSnapshot,
        now: DateTime<Utc>,
    ) -> Option<SpikeEvent> {
        if baseline.long <= 0.0 || !value.is_finite() {
            return None;
        }

        let ratio = value / baseline.long;
        let threshold = self.threshold(baseline);
        if ratio < threshold {
            return None;
        }

        if let Some(last) = self.last_emitted_at {
            if now - last <= self.rearm {
                return None;
            }
        }

        let event = SpikeEvent {
            id: Uuid::new_v4(),
            timestamp: now,
            metric,
            value,
            ratio_to_baseline: ratio,
            threshold,
        };

        tracing::debug!(
            metric = %metric,
            ratio,
            threshold,
            "Spike detected"
        );

        self.last_emitted_at = Some(now);
        self.history.push_front(event.clone());
        self.history.truncate(self.capacity);
        Some(event)
    }

    /// Emitted spikes, most recent first.
    pub fn history(&self) -> impl Iterator<Item = &SpikeEvent> {
        self.history.iter()
    }

    pub fn reset(&mut self) {
        self.last_emitted_at = None;
        self.history.clear();
    }
}
