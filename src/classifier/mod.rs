pub mod heuristic;
pub mod remote;

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{BreakerScope, ClassifierConfig};
use crate::error::ClassifyError;
use crate::types::Tone;

pub use heuristic::HeuristicClassifier;
pub use remote::RemoteClassifier;

/// Short rolling context handed to the classifier with each message
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassifyContext {
    pub author: String,
    pub recent_messages: Vec<String>,
}

/// A tone label with its confidence in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToneVerdict {
    pub tone: Tone,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// Trait for tone classifiers.
///
/// Implementations may be slow or fail; callers go through `ClassifierGate`,
/// which bounds the wait and falls back to the heuristic.
#[async_trait]
pub trait ToneClassifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, text: &str, ctx: &ClassifyContext) -> Result<ToneVerdict, ClassifyError>;
}

/// Which path produced a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    Remote,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub verdict: ToneVerdict,
    pub source: VerdictSource,
}

/// Open/closed state of the quota breaker. Clones share state, which is how
/// a process-wide breaker is handed to every channel.
#[derive(Debug, Clone, Default)]
pub struct QuotaBreaker {
    open_until: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl QuotaBreaker {
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let guard = self.open_until.lock().unwrap_or_else(|e| e.into_inner());
        matches!(*guard, Some(until) if now < until)
    }

    pub fn trip(&self, until: DateTime<Utc>) {
        let mut guard = self.open_until.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(until);
    }

    pub fn open_until(&self) -> Option<DateTime<Utc>> {
        *self.open_until.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Bounded, failure-tolerant access to the tone classifier
#[derive(Clone)]
pub struct ClassifierGate {
    remote: Option<Arc<dyn ToneClassifier>>,
    heuristic: Arc<HeuristicClassifier>,
    breaker: QuotaBreaker,
    timeout: std::time::Duration,
    quota_cooldown: Duration,
}

impl ClassifierGate {
    pub fn new(
        remote: Option<Arc<dyn ToneClassifier>>,
        heuristic: Arc<HeuristicClassifier>,
        breaker: QuotaBreaker,
        config: &ClassifierConfig,
    ) -> Self {
        Self {
            remote,
            heuristic,
            breaker,
            timeout: std::time::Duration::from_millis(config.timeout_ms),
            quota_cooldown: Duration::seconds(config.quota_cooldown_secs),
        }
    }

    /// Gate that never leaves the process
    pub fn heuristic_only(heuristic: Arc<HeuristicClassifier>) -> Self {
        Self::new(None, heuristic, QuotaBreaker::default(), &ClassifierConfig::default())
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn breaker(&self) -> &QuotaBreaker {
        &self.breaker
    }

    /// Classify `text`, never failing: any remote problem yields the heuristic.
    pub async fn classify(&self, text: &str, ctx: &ClassifyContext, now: DateTime<Utc>) -> Classification {
        let Some(remote) = &self.remote else {
            return self.fallback(text);
        };

        if self.breaker.is_open(now) {
            tracing::debug!("Classifier breaker open, using heuristic");
            return self.fallback(text);
        }

        let outcome = match tokio::time::timeout(self.timeout, remote.classify(text, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifyError::Timeout(self.timeout.as_millis() as u64)),
        };

        match outcome {
            Ok(verdict) => Classification {
                verdict,
                source: VerdictSource::Remote,
            },
            Err(ClassifyError::Quota) => {
                let until = now + self.quota_cooldown;
                self.breaker.trip(until);
                tracing::warn!(
                    classifier = remote.name(),
                    until = %until,
                    "Classifier quota exhausted, falling back to heuristics"
                );
                self.fallback(text)
            }
            Err(e) => {
                tracing::debug!(classifier = remote.name(), error = %e, "Classifier failed, using heuristic");
                self.fallback(text)
            }
        }
    }

    fn fallback(&self, text: &str) -> Classification {
        Classification {
            verdict: self.heuristic.infer(text),
            source: VerdictSource::Heuristic,
        }
    }
}

/// Builds one gate per channel from shared pieces
pub struct ClassifierFactory {
    config: ClassifierConfig,
    remote: Option<Arc<dyn ToneClassifier>>,
    heuristic: Arc<HeuristicClassifier>,
    shared_breaker: QuotaBreaker,
}

impl ClassifierFactory {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let heuristic = Arc::new(HeuristicClassifier::new()?);

        let remote: Option<Arc<dyn ToneClassifier>> = match (&config.endpoint, &config.api_key) {
            (Some(endpoint), Some(key)) if config.enabled => {
                tracing::info!(endpoint = %endpoint, "Remote tone classifier enabled");
                Some(Arc::new(RemoteClassifier::new(endpoint, key, config.timeout_ms)?))
            }
            (Some(_), None) if config.enabled => {
                tracing::info!("No classifier API key configured, using heuristics only");
                None
            }
            _ => None,
        };

        Ok(Self {
            config: config.clone(),
            remote,
            heuristic,
            shared_breaker: QuotaBreaker::default(),
        })
    }

    pub fn heuristic(&self) -> Arc<HeuristicClassifier> {
        self.heuristic.clone()
    }

    pub fn gate(&self) -> ClassifierGate {
        let breaker = match self.config.breaker_scope {
            BreakerScope::Process => self.shared_breaker.clone(),
            BreakerScope::Channel => QuotaBreaker::default(),
        };
        ClassifierGate::new(self.remote.clone(), self.heuristic.clone(), breaker, &self.config)
    }
}
