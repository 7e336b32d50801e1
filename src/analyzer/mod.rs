pub mod audience;
pub mod tone;
pub mod velocity;

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::config::AlertingConfig;
use crate::types::{AggregatedSnapshot, BaselineSnapshot, CandidateAlert, ChatRecord, DetectorKind, Tone};
use crate::window::AuthorStatus;

/// Trait for the heuristic detectors run on every evaluation cycle.
///
/// Each detector looks at the same context and yields at most one candidate;
/// arbitration between them happens in the alert engine.
pub trait Detector: Send + Sync {
    fn kind(&self) -> DetectorKind;

    fn detect(&self, ctx: &EvalContext<'_>) -> Option<CandidateAlert>;
}

/// Build the fixed detector battery
pub fn create_detectors() -> Vec<Box<dyn Detector>> {
    let detectors: Vec<Box<dyn Detector>> = vec![
        Box::new(audience::NewcomerSurge),
        Box::new(audience::ReturningAudience),
        Box::new(velocity::VelocitySurge),
        Box::new(tone::PositiveSpike::new(Tone::Hype)),
        Box::new(tone::PositiveSpike::new(Tone::Humor)),
        Box::new(tone::PositiveSpike::new(Tone::Supportive)),
        Box::new(tone::ConstructiveFeedback),
        Box::new(tone::SpamWarning),
        Box::new(tone::ToneDip),
        Box::new(velocity::MomentumDrop),
    ];

    tracing::debug!(count = detectors.len(), "Initialized detectors");
    detectors
}

/// A buffered message with its effective tone for this cycle
#[derive(Debug, Clone, Copy)]
pub struct BatchMessage<'a> {
    pub record: &'a ChatRecord,
    pub tone: Tone,
    pub confidence: f64,
    pub status: AuthorStatus,
}

/// Tone frequencies over a set of messages
#[derive(Debug, Clone, Default)]
pub struct ToneStats {
    counts: HashMap<Tone, usize>,
    total: usize,
}

impl ToneStats {
    pub fn from_messages<'m, 'r: 'm, I>(messages: I) -> Self
    where
        I: IntoIterator<Item = &'m BatchMessage<'r>>,
    {
        let mut stats = ToneStats::default();
        for m in messages {
            *stats.counts.entry(m.tone).or_insert(0) += 1;
            stats.total += 1;
        }
        stats
    }

    pub fn count(&self, tone: Tone) -> usize {
        self.counts.get(&tone).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn ratio(&self, tone: Tone) -> f64 {
        self.count(tone) as f64 / self.total.max(1) as f64
    }

    pub fn positive(&self) -> usize {
        self.counts.iter().filter(|(t, _)| t.is_positive()).map(|(_, n)| n).sum()
    }

    pub fn negative(&self) -> usize {
        self.counts.iter().filter(|(t, _)| t.is_negative()).map(|(_, n)| n).sum()
    }

    pub fn negative_ratio(&self) -> f64 {
        self.negative() as f64 / self.total.max(1) as f64
    }
}

/// Everything a detector may look at during one cycle
pub struct EvalContext<'a> {
    pub now: DateTime<Utc>,
    /// Messages within the batch window, oldest first
    pub messages: &'a [BatchMessage<'a>],
    pub metrics: &'a AggregatedSnapshot,
    /// Message-rate baseline
    pub baseline: &'a BaselineSnapshot,
    pub session_age_secs: f64,
    pub settings: &'a AlertingConfig,
    /// Tone frequencies over the whole batch
    pub batch: ToneStats,
    /// Tone frequencies over the recent sub-window
    pub recent: ToneStats,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        now: DateTime<Utc>,
        messages: &'a [BatchMessage<'a>],
        metrics: &'a AggregatedSnapshot,
        baseline: &'a BaselineSnapshot,
        session_age_secs: f64,
        settings: &'a AlertingConfig,
    ) -> Self {
        let batch = ToneStats::from_messages(messages.iter());
        let cutoff = now - Duration::seconds(settings.recent_window_secs);
        let recent = ToneStats::from_messages(messages.iter().filter(|m| m.record.timestamp >= cutoff));
        Self {
            now,
            messages,
            metrics,
            baseline,
            session_age_secs,
            settings,
            batch,
            recent,
        }
    }

    /// Messages no older than `secs` before `now`.
    pub fn within(&self, secs: i64) -> impl Iterator<Item = &BatchMessage<'a>> + '_ {
        let cutoff = self.now - Duration::seconds(secs);
        self.messages.iter().filter(move |m| m.record.timestamp >= cutoff)
    }

    /// Timestamp of the newest message in the batch, or `now` when empty.
    pub fn latest(&self) -> DateTime<Utc> {
        self.messages
            .iter()
            .map(|m| m.record.timestamp)
            .max()
            .unwrap_or(self.now)
    }

    /// Grows logarithmically with audience size: 1.0 for an empty room,
    /// 1.5 at 9 chatters, 2.0 at 99.
    pub fn audience_scale(&self) -> f64 {
        1.0 + (1.0 + self.metrics.unique_chatters as f64).log10() / 2.0
    }

    /// Rate z-score and percentage delta against the long baseline.
    pub fn rate_deviation(&self) -> Option<(f64, f64)> {
        let long = self.baseline.long;
        if long <= 0.0 {
            return None;
        }
        let rate = self.metrics.message_rate as f64;
        let z = if self.baseline.std > 1e-6 {
            (rate - long) / self.baseline.std
        } else {
            0.0
        };
        let pct = (rate - long) / long * 100.0;
        Some((z, pct))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::TimeZone;
    use smallvec::SmallVec;

    use super::*;

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap()
    }

    pub fn record(id: usize, author: &str, secs: i64, sentiment: f64) -> ChatRecord {
        ChatRecord {
            id: id.to_string(),
            timestamp: t0() + Duration::seconds(secs),
            author: author.to_string(),
            text: format!("message {}", id),
            tokens: Vec::new(),
            emotes: SmallVec::new(),
            sentiment,
            tone: Tone::Neutral,
            tone_confidence: 0.5,
        }
    }

    pub fn batch<'a>(records: &'a [ChatRecord], tones: &[Tone], status: AuthorStatus) -> Vec<BatchMessage<'a>> {
        records
            .iter()
            .zip(tones.iter())
            .map(|(record, tone)| BatchMessage {
                record,
                tone: *tone,
                confidence: 0.6,
                status,
            })
            .collect()
    }

    pub fn metrics(rate: usize, unique: usize, secs: i64) -> AggregatedSnapshot {
        let mut m = AggregatedSnapshot::empty("test", t0() + Duration::seconds(secs));
        m.message_rate = rate;
        m.unique_chatters = unique;
        m
    }

    pub fn baseline(long: f64, std: f64, ready: bool) -> BaselineSnapshot {
        BaselineSnapshot {
            short: long,
            long,
            std,
            samples: 200,
            ready,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn tone_stats_split_batch_and_recent() {
        let records: Vec<ChatRecord> = (0..4).map(|i| record(i, "a", i as i64 * 20, 0.0)).collect();
        let msgs = batch(&records, &[Tone::Toxic, Tone::Hype, Tone::Hype, Tone::Critical], AuthorStatus::Regular);
        let metrics = metrics(4, 1, 60);
        let base = baseline(4.0, 1.0, true);
        let settings = AlertingConfig::default();
        let ctx = EvalContext::new(t0() + Duration::seconds(60), &msgs, &metrics, &base, 300.0, &settings);

        assert_eq!(ctx.batch.total(), 4);
        assert_eq!(ctx.batch.negative(), 2);
        assert_eq!(ctx.batch.positive(), 2);
        // recent window is 30s: messages at 40s and 60s
        assert_eq!(ctx.recent.total(), 2);
        assert_eq!(ctx.recent.count(Tone::Critical), 1);
        assert!((ctx.recent.negative_ratio() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn audience_scale_grows_logarithmically() {
        let settings = AlertingConfig::default();
        let base = baseline(1.0, 1.0, true);
        let small = metrics(0, 9, 0);
        let large = metrics(0, 99, 0);
        let a = EvalContext::new(t0(), &[], &small, &base, 0.0, &settings);
        let b = EvalContext::new(t0(), &[], &large, &base, 0.0, &settings);
        assert!((a.audience_scale() - 1.5).abs() < 1e-9);
        assert!((b.audience_scale() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn battery_has_one_detector_per_kind() {
        let detectors = create_detectors();
        let mut kinds: Vec<String> = detectors.iter().map(|d| d.kind().to_string()).collect();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), detectors.len());
    }
}
