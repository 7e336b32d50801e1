pub mod cooldown;

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::analyzer::{create_detectors, BatchMessage, Detector, EvalContext};
use crate::config::AlertingConfig;
use crate::types::{
    AggregatedSnapshot, AlertTone, AuthorKey, BaselineSnapshot, CandidateAlert, DetectorKind, EmittedAlert, Priority,
};
use cooldown::{dynamic_cooldown, CooldownBook, CooldownKey};

const MIN_BUDGET: usize = 3;
const MAX_BUDGET: usize = 8;

/// Engine state, derived from the cooldown book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No cooldown in effect; the idle gate is armed
    Cold,
    /// At least one key is still cooling down
    Active,
    /// The queried key is inside its own cooldown window
    Suppressed,
}

/// Number of alerts a single cycle may emit.
///
/// `3 + floor(log5(unique + 1))`, clamped to `[3, 8]`.
pub fn alert_budget(unique_chatters: usize) -> usize {
    let target = unique_chatters.saturating_add(1);
    let mut steps = 0;
    let mut power: usize = 5;
    while power <= target {
        steps += 1;
        power = match power.checked_mul(5) {
            Some(p) => p,
            None => break,
        };
    }
    (MIN_BUDGET + steps).clamp(MIN_BUDGET, MAX_BUDGET)
}

/// Dedup identity: tone, priority and whitespace/case-folded message
fn dedup_key(candidate: &CandidateAlert) -> (AlertTone, Priority, String) {
    let message = candidate
        .message
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    (candidate.tone, candidate.priority, message)
}

/// Runs the detector battery and arbitrates between candidates
pub struct AlertEngine {
    channel: String,
    settings: AlertingConfig,
    detectors: Vec<Box<dyn Detector>>,
    cooldowns: CooldownBook,
    history: VecDeque<EmittedAlert>,
    idle_since: Option<DateTime<Utc>>,
}

impl AlertEngine {
    pub fn new(channel: &str, settings: &AlertingConfig) -> Self {
        Self::with_detectors(channel, settings, create_detectors())
    }

    pub fn with_detectors(channel: &str, settings: &AlertingConfig, detectors: Vec<Box<dyn Detector>>) -> Self {
        Self {
            channel: channel.to_string(),
            settings: settings.clone(),
            detectors,
            cooldowns: CooldownBook::new(),
            history: VecDeque::new(),
            idle_since: None,
        }
    }

    /// One evaluation cycle.
    ///
    /// Returns the alerts emitted in this cycle; they are also retained in
    /// the presented history until they age out.
    pub fn evaluate(
        &mut self,
        messages: &[BatchMessage<'_>],
        metrics: &AggregatedSnapshot,
        baseline: &BaselineSnapshot,
        session_age_secs: f64,
        now: DateTime<Utc>,
    ) -> Vec<EmittedAlert> {
        if metrics.is_idle() {
            self.idle_since.get_or_insert(now);
        } else {
            self.idle_since = None;
        }

        let ctx = EvalContext::new(now, messages, metrics, baseline, session_age_secs, &self.settings);
        let mut candidates: Vec<(CandidateAlert, Duration)> = Vec::new();
        for detector in &self.detectors {
            let Some(candidate) = detector.detect(&ctx) else {
                continue;
            };
            let key = CooldownKey::new(candidate.kind, candidate.author.clone());
            let cooldown = dynamic_cooldown(self.settings.cooldown_for(candidate.kind), candidate.intensity);
            if self.cooldowns.admit(&key, candidate.priority, cooldown, now) {
                candidates.push((candidate, cooldown));
            } else {
                tracing::debug!(
                    channel = %self.channel,
                    kind = %candidate.kind,
                    priority = %candidate.priority,
                    "Candidate suppressed by cooldown"
                );
            }
        }

        candidates.sort_by(|(a, _), (b, _)| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.priority.weight().cmp(&a.priority.weight()))
        });

        let mut seen = HashSet::new();
        candidates.retain(|(c, _)| seen.insert(dedup_key(c)));
        candidates.truncate(alert_budget(metrics.unique_chatters));

        let mut emitted: Vec<EmittedAlert> = candidates
            .into_iter()
            .map(|(candidate, cooldown)| self.emit(candidate, cooldown, now))
            .collect();

        if emitted.is_empty() {
            if let Some(calm) = self.calm(now) {
                emitted.push(calm);
            }
        }

        self.prune(now);
        emitted
    }

    /// Single low-priority status once the channel has been idle long enough
    fn calm(&mut self, now: DateTime<Utc>) -> Option<EmittedAlert> {
        let idle_since = self.idle_since?;
        if now - idle_since <= Duration::seconds(self.settings.idle_calm_secs) {
            return None;
        }
        let key = CooldownKey::new(DetectorKind::Calm, None);
        let cooldown = self.settings.cooldown_for(DetectorKind::Calm);
        if !self.cooldowns.admit(&key, Priority::Low, cooldown, now) {
            return None;
        }

        let candidate = CandidateAlert {
            kind: DetectorKind::Calm,
            author: None,
            message: "Chat has gone quiet, a good moment to prompt the audience".to_string(),
            tone: AlertTone::Neutral,
            priority: Priority::Low,
            timestamp: now,
            intensity: 0.0,
        };
        Some(self.emit(candidate, cooldown, now))
    }

    fn emit(&mut self, candidate: CandidateAlert, cooldown: Duration, now: DateTime<Utc>) -> EmittedAlert {
        let key = CooldownKey::new(candidate.kind, candidate.author.clone());
        self.cooldowns.record(key, candidate.priority, cooldown, now);

        let alert = EmittedAlert {
            id: Uuid::new_v4(),
            channel: self.channel.clone(),
            kind: candidate.kind,
            message: candidate.message,
            tone: candidate.tone,
            priority: candidate.priority,
            timestamp: now,
        };
        tracing::info!(
            channel = %self.channel,
            kind = %alert.kind,
            priority = %alert.priority,
            message = %alert.message,
            "Alert emitted"
        );
        self.history.push_back(alert.clone());
        alert
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(self.settings.history_secs);
        while self.history.front().is_some_and(|a| a.timestamp < cutoff) {
            self.history.pop_front();
        }
    }

    /// Alerts still within the history window, newest first
    pub fn presented(&self, now: DateTime<Utc>) -> Vec<EmittedAlert> {
        let cutoff = now - Duration::seconds(self.settings.history_secs);
        self.history
            .iter()
            .rev()
            .filter(|a| a.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    pub fn state(&self, now: DateTime<Utc>) -> EngineState {
        if self.cooldowns.any_active(now) {
            EngineState::Active
        } else {
            EngineState::Cold
        }
    }

    /// State as seen by one detector key: `Suppressed` while that key cools
    /// down, otherwise the engine-wide state.
    pub fn state_for(&self, kind: DetectorKind, author: Option<AuthorKey>, now: DateTime<Utc>) -> EngineState {
        if self.cooldowns.is_suppressed(&CooldownKey::new(kind, author), now) {
            EngineState::Suppressed
        } else {
            self.state(now)
        }
    }

    /// Clear cooldowns, history and the idle gate
    pub fn reset(&mut self) {
        self.cooldowns.clear();
        self.history.clear();
        self.idle_since = None;
    }
}
