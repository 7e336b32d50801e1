use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

use crate::alerter::{AlertEngine, EngineState};
use crate::analyzer::BatchMessage;
use crate::baseline::BaselineTracker;
use crate::classifier::{Classification, ClassifierGate, ClassifyContext, VerdictSource};
use crate::config::Config;
use crate::error::RecordError;
use crate::spike::SpikeDetector;
use crate::types::{AggregatedSnapshot, ChatRecord, EmittedAlert, MetricId, SpikeEvent};
use crate::window::WindowAggregator;

/// Work item for a channel worker
#[derive(Debug)]
pub enum ChannelCommand {
    Chat(ChatRecord),
    /// Session boundary
    Reset,
}

/// What a channel worker reports
#[derive(Debug, Clone)]
pub enum ChannelOutput {
    Snapshot(AggregatedSnapshot),
    Alerts(Vec<EmittedAlert>),
}

/// All per-channel state. Owned by exactly one worker, never shared.
pub struct ChannelState {
    channel: String,
    window: WindowAggregator,
    baselines: BaselineTracker,
    spikes: SpikeDetector,
    engine: AlertEngine,
    gate: ClassifierGate,
    /// Remote tone verdicts by record id; records themselves stay immutable
    refined: HashMap<String, Classification>,
    /// Records awaiting classification, with their timestamps
    pending: VecDeque<(String, DateTime<Utc>)>,
    /// Detached classifier calls; verdicts are collected on later cycles
    inflight: JoinSet<Option<(String, Classification)>>,
    max_in_flight: usize,
    session_started: Option<DateTime<Utc>>,
    last_sample_at: Option<DateTime<Utc>>,
    last_snapshot: Option<AggregatedSnapshot>,
    context_messages: usize,
    batch_window: Duration,
}

impl ChannelState {
    pub fn new(channel: &str, config: &Config, gate: ClassifierGate) -> Self {
        Self {
            channel: channel.to_string(),
            window: WindowAggregator::new(channel, &config.window),
            baselines: BaselineTracker::new(&config.baseline),
            spikes: SpikeDetector::new(&config.spike),
            engine: AlertEngine::new(channel, &config.alerting),
            gate,
            refined: HashMap::new(),
            pending: VecDeque::new(),
            inflight: JoinSet::new(),
            max_in_flight: config.classifier.max_in_flight.max(1),
            session_started: None,
            last_sample_at: None,
            last_snapshot: None,
            context_messages: config.classifier.context_messages,
            batch_window: Duration::seconds(config.alerting.batch_window_secs),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn clock(&self) -> Option<DateTime<Utc>> {
        self.window.clock()
    }

    /// Aggregate one record. A rejected record leaves all state untouched.
    pub fn ingest(&mut self, record: ChatRecord) -> Result<AggregatedSnapshot, RecordError> {
        let id = record.id.clone();
        let at = record.timestamp;
        let snapshot = self.window.ingest(record)?;
        if self.gate.has_remote() {
            self.pending.push_back((id, at));
        }
        Ok(self.sample(snapshot))
    }

    /// Metrics at `now` with no new record.
    pub fn tick(&mut self, now: DateTime<Utc>) -> AggregatedSnapshot {
        let snapshot = self.window.snapshot_at(now);
        self.sample(snapshot)
    }

    /// Feed baselines, check the rate for a spike and attach both.
    fn sample(&mut self, mut snapshot: AggregatedSnapshot) -> AggregatedSnapshot {
        let now = snapshot.timestamp;
        self.session_started.get_or_insert(now);

        let rate_baseline = self.baselines.snapshot(MetricId::MessageRate);
        snapshot.spike = self
            .spikes
            .evaluate(MetricId::MessageRate, snapshot.message_rate as f64, &rate_baseline, now);

        let dt = self
            .last_sample_at
            .map(|prev| seconds(now - prev))
            .unwrap_or(0.0);
        for (metric, value) in snapshot.metric_values() {
            self.baselines.update(metric, value, dt);
        }
        self.last_sample_at = Some(now);

        snapshot.baselines = self.baselines.snapshots();
        self.last_snapshot = Some(snapshot.clone());
        snapshot
    }

    /// One alert evaluation cycle at `now`.
    ///
    /// Never waits on the remote classifier: verdicts that have not arrived
    /// yet leave the record's own tone in effect for this cycle.
    pub async fn evaluate(&mut self, now: DateTime<Utc>) -> Vec<EmittedAlert> {
        self.refine(now);

        let metrics = match self.last_snapshot.clone() {
            Some(snapshot) => snapshot,
            None => self.tick(now),
        };

        let cutoff = now - self.batch_window;
        let refined = &self.refined;
        let messages: Vec<BatchMessage<'_>> = self
            .window
            .entries_since(cutoff)
            .map(|entry| {
                let (tone, confidence) = match refined.get(&entry.record.id) {
                    Some(c) => (c.verdict.tone, c.verdict.confidence),
                    None => (entry.record.tone, entry.record.tone_confidence),
                };
                BatchMessage {
                    record: &entry.record,
                    tone,
                    confidence,
                    status: entry.status,
                }
            })
            .collect();

        let rate_baseline = self.baselines.snapshot(MetricId::MessageRate);
        let session_age = self
            .session_started
            .map(|started| seconds(now - started).max(0.0))
            .unwrap_or(0.0);

        self.engine
            .evaluate(&messages, &metrics, &rate_baseline, session_age, now)
    }

    /// Collect finished verdicts and start calls for pending records still
    /// in the batch window, at most `max_in_flight` at a time.
    fn refine(&mut self, now: DateTime<Utc>) {
        while let Some(joined) = self.inflight.try_join_next() {
            match joined {
                Ok(Some((id, classification))) => {
                    self.refined.insert(id, classification);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(channel = %self.channel, error = %e, "Classification task failed");
                }
            }
        }

        let cutoff = now - self.batch_window;
        if self.gate.breaker().is_open(now) {
            self.pending.clear();
        }
        while self.pending.front().is_some_and(|(_, at)| *at < cutoff) {
            self.pending.pop_front();
        }
        while self.inflight.len() < self.max_in_flight {
            let Some((id, at)) = self.pending.pop_front() else {
                break;
            };
            if at < cutoff {
                continue;
            }
            let Some(entry) = self.window.get(&id) else {
                continue;
            };
            let text = entry.record.text.clone();
            let ctx = ClassifyContext {
                author: entry.record.author.clone(),
                recent_messages: self.window.context_before(&id, self.context_messages),
            };
            let gate = self.gate.clone();
            self.inflight.spawn(async move {
                let classification = gate.classify(&text, &ctx, now).await;
                (classification.source == VerdictSource::Remote).then_some((id, classification))
            });
        }

        if !self.refined.is_empty() {
            let live: HashSet<&str> = self
                .window
                .entries_since(DateTime::<Utc>::MIN_UTC)
                .map(|e| e.record.id.as_str())
                .collect();
            self.refined.retain(|id, _| live.contains(id.as_str()));
        }
    }

    /// Alerts still within the history window, newest first.
    pub fn presented_alerts(&self, now: DateTime<Utc>) -> Vec<EmittedAlert> {
        self.engine.presented(now)
    }

    pub fn engine_state(&self, now: DateTime<Utc>) -> EngineState {
        self.engine.state(now)
    }

    pub fn spike_history(&self) -> impl Iterator<Item = &SpikeEvent> {
        self.spikes.history()
    }

    /// Tone verdict the next evaluation will use for `id`, if refined remotely
    pub fn refined_tone(&self, id: &str) -> Option<&Classification> {
        self.refined.get(id)
    }

    /// Session boundary: drop everything except the classifier gate.
    pub fn reset(&mut self) {
        self.window.reset();
        self.baselines.reset();
        self.spikes.reset();
        self.engine.reset();
        self.refined.clear();
        self.pending.clear();
        // dropping the set aborts calls from the previous session
        self.inflight = JoinSet::new();
        self.session_started = None;
        self.last_sample_at = None;
        self.last_snapshot = None;
        tracing::info!(channel = %self.channel, "Channel state reset");
    }
}

fn seconds(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 1000.0
}

/// Drive one channel until its command queue closes.
///
/// Ticks advance the channel's event clock by wall time elapsed since the
/// last accepted record, so replayed streams keep their own timeline. No
/// tick is evaluated before the first record of a session.
pub async fn run_channel(
    mut state: ChannelState,
    mut commands: mpsc::Receiver<ChannelCommand>,
    outputs: mpsc::Sender<ChannelOutput>,
    tick_every: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(tick_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut anchor: Option<(DateTime<Utc>, Instant)> = None;

    loop {
        let (snapshot, now) = tokio::select! {
            command = commands.recv() => match command {
                Some(ChannelCommand::Chat(record)) => match state.ingest(record) {
                    Ok(snapshot) => {
                        let now = snapshot.timestamp;
                        anchor = Some((now, Instant::now()));
                        (snapshot, now)
                    }
                    Err(e) => {
                        tracing::warn!(channel = %state.channel(), error = %e, "Rejected chat record");
                        continue;
                    }
                },
                Some(ChannelCommand::Reset) => {
                    state.reset();
                    anchor = None;
                    continue;
                }
                None => break,
            },
            _ = ticker.tick() => {
                let Some((clock, at)) = anchor else {
                    continue;
                };
                let elapsed = Duration::from_std(at.elapsed()).unwrap_or_else(|_| Duration::zero());
                let now = clock + elapsed;
                (state.tick(now), now)
            }
        };

        if outputs.send(ChannelOutput::Snapshot(snapshot)).await.is_err() {
            break;
        }

        let alerts = state.evaluate(now).await;
        if !alerts.is_empty() && outputs.send(ChannelOutput::Alerts(alerts)).await.is_err() {
            break;
        }
    }

    tracing::info!(channel = %state.channel(), "Channel worker stopped");
}

/// Spawn a worker for `channel` and return its command queue.
pub fn spawn_channel(
    channel: &str,
    config: &Config,
    gate: ClassifierGate,
    outputs: mpsc::Sender<ChannelOutput>,
) -> (mpsc::Sender<ChannelCommand>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.agent.channel_queue);
    let state = ChannelState::new(channel, config, gate);
    let tick_every = std::time::Duration::from_secs(config.agent.tick_secs);
    tracing::info!(channel, "Spawned channel worker");
    let handle = tokio::spawn(run_channel(state, rx, outputs, tick_every));
    (tx, handle)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::analyzer::fixtures::{record, t0};
    use crate::classifier::{HeuristicClassifier, QuotaBreaker, ToneClassifier, ToneVerdict};
    use crate::error::ClassifyError;
    use crate::types::Tone;

    /// Answers every message as supportive, just inside the gate's timeout
    struct Sluggish {
        delay: std::time::Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToneClassifier for Sluggish {
        fn name(&self) -> &str { "sluggish" }

        async fn classify(&self, _text: &str, _ctx: &ClassifyContext) -> Result<ToneVerdict, ClassifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(ToneVerdict { tone: Tone::Supportive, confidence: 0.8, rationale: None })
        }
    }

    fn state() -> ChannelState {
        let gate = ClassifierGate::heuristic_only(Arc::new(HeuristicClassifier::new().unwrap()));
        ChannelState::new("test", &Config::default(), gate)
    }

    #[test]
    fn ingest_feeds_baselines() {
        let mut state = state();
        let snapshot = state.ingest(record(1, "a", 0, 0.2)).unwrap();
        assert_eq!(snapshot.message_rate, 1);
        assert_eq!(snapshot.baselines.len(), 4);
        assert_eq!(snapshot.baselines[&MetricId::MessageRate].samples, 1);
        assert!(snapshot.spike.is_none());
    }

    #[test]
    fn rejected_record_leaves_state_untouched() {
        let mut state = state();
        state.ingest(record(1, "a", 0, 0.0)).unwrap();
        let mut bad = record(2, "b", 1, 0.0);
        bad.sentiment = 3.0;
        assert!(state.ingest(bad).is_err());

        let snapshot = state.tick(t0() + Duration::seconds(1));
        assert_eq!(snapshot.message_rate, 1);
        assert_eq!(snapshot.unique_chatters, 1);
    }

    #[test]
    fn tick_decays_rate_on_silence() {
        let mut state = state();
        state.ingest(record(1, "a", 0, 0.0)).unwrap();
        let snapshot = state.tick(t0() + Duration::seconds(61));
        assert_eq!(snapshot.message_rate, 0);
    }

    #[tokio::test]
    async fn spam_burst_raises_high_priority_warning() {
        let mut state = state();
        for i in 0..3 {
            let mut r = record(i, &format!("bot{}", i), i as i64 * 2, 0.0);
            r.text = "free followers at bestsite.com".into();
            r.tone = Tone::Spam;
            state.ingest(r).unwrap();
        }
        let alerts = state.evaluate(t0() + Duration::seconds(5)).await;
        let spam = alerts
            .iter()
            .find(|a| a.kind == crate::types::DetectorKind::SpamWarning)
            .unwrap();
        assert_eq!(spam.priority, crate::types::Priority::High);
        assert_eq!(state.presented_alerts(t0() + Duration::seconds(5)).len(), alerts.len());
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let mut state = state();
        for i in 0..3 {
            let mut r = record(i, &format!("bot{}", i), i as i64, 0.0);
            r.tone = Tone::Spam;
            state.ingest(r).unwrap();
        }
        assert!(!state.evaluate(t0() + Duration::seconds(3)).await.is_empty());

        state.reset();
        assert!(state.clock().is_none());
        assert!(state.presented_alerts(t0() + Duration::seconds(3)).is_empty());
        assert_eq!(state.engine_state(t0() + Duration::seconds(3)), EngineState::Cold);

        let snapshot = state.ingest(record(10, "bot0", 4, 0.0)).unwrap();
        assert_eq!(snapshot.newcomers, 1);
        assert_eq!(snapshot.baselines[&MetricId::MessageRate].samples, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_classifier_never_stalls_evaluation() {
        let config = Config::default();
        let remote = Arc::new(Sluggish {
            delay: std::time::Duration::from_millis(1400),
            calls: AtomicUsize::new(0),
        });
        let gate = ClassifierGate::new(
            Some(remote.clone()),
            Arc::new(HeuristicClassifier::new().unwrap()),
            QuotaBreaker::default(),
            &config.classifier,
        );
        let mut state = ChannelState::new("test", &config, gate);
        for i in 0..30 {
            state.ingest(record(i, &format!("u{}", i), (i / 10) as i64, 0.1)).unwrap();
        }

        let started = Instant::now();
        state.evaluate(t0() + Duration::seconds(3)).await;
        assert!(started.elapsed() < std::time::Duration::from_millis(100));
        assert!(state.refined_tone("0").is_none());

        // verdicts land on later cycles, a bounded batch at a time
        for step in 1..=10 {
            tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
            let started = Instant::now();
            state.evaluate(t0() + Duration::seconds(3 + step)).await;
            assert!(started.elapsed() < std::time::Duration::from_millis(100));
            assert!(remote.calls.load(Ordering::SeqCst) <= 4 * (step as usize + 1));
        }
        assert_eq!(remote.calls.load(Ordering::SeqCst), 30);
        assert!((0..30).all(|i| state.refined_tone(&i.to_string()).is_some()));
        assert_eq!(state.refined_tone("7").unwrap().verdict.tone, Tone::Supportive);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_abandons_classifier_calls() {
        let config = Config::default();
        let remote = Arc::new(Sluggish {
            delay: std::time::Duration::from_millis(500),
            calls: AtomicUsize::new(0),
        });
        let gate = ClassifierGate::new(
            Some(remote.clone()),
            Arc::new(HeuristicClassifier::new().unwrap()),
            QuotaBreaker::default(),
            &config.classifier,
        );
        let mut state = ChannelState::new("test", &config, gate);
        state.ingest(record(1, "a", 0, 0.0)).unwrap();
        state.evaluate(t0()).await;
        state.reset();

        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        state.ingest(record(1, "a", 0, 0.0)).unwrap();
        state.evaluate(t0()).await;
        assert!(state.refined_tone("1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn worker_reports_snapshots_and_stops_on_close() {
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (cmd_tx, handle) = spawn_channel(
            "test",
            &Config::default(),
            ClassifierGate::heuristic_only(Arc::new(HeuristicClassifier::new().unwrap())),
            out_tx,
        );

        cmd_tx.send(ChannelCommand::Chat(record(1, "a", 0, 0.0))).await.unwrap();
        match out_rx.recv().await.unwrap() {
            ChannelOutput::Snapshot(s) => assert_eq!(s.message_rate, 1),
            other => panic!("unexpected output: {:?}", other),
        }

        // the first-time chatter is greeted before the next tick
        match out_rx.recv().await.unwrap() {
            ChannelOutput::Alerts(alerts) => assert_eq!(alerts.len(), 1),
            other => panic!("unexpected output: {:?}", other),
        }

        // a tick advances the event clock by wall time
        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        match out_rx.recv().await.unwrap() {
            ChannelOutput::Snapshot(s) => assert!(s.timestamp >= t0() + Duration::seconds(5)),
            other => panic!("unexpected output: {:?}", other),
        }

        drop(cmd_tx);
        drop(out_rx);
        handle.await.unwrap();
    }
}
