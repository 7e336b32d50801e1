use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::Deserialize;

use crate::types::{DetectorKind, Priority};

/// Upper bound for any configured duration: one week
const MAX_DURATION_SECS: i64 = 7 * 24 * 3600;

/// Top-level configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub baseline: BaselineConfig,
    #[serde(default)]
    pub spike: SpikeConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub sink: SinkConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_instance")]
    pub instance: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Periodic evaluation interval, independent of message arrival
    #[serde(default = "default_tick")]
    pub tick_secs: u64,
    #[serde(default = "default_channel_queue")]
    pub channel_queue: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            instance: default_instance(),
            log_level: default_log_level(),
            tick_secs: default_tick(),
            channel_queue: default_channel_queue(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WindowConfig {
    #[serde(default = "default_retention")]
    pub retention_secs: i64,
    #[serde(default = "default_rate_window")]
    pub rate_window_secs: i64,
    #[serde(default = "default_sentiment_window")]
    pub sentiment_window_secs: i64,
    /// Silence after which a known author counts as returning
    #[serde(default = "default_returning_gap")]
    pub returning_gap_secs: i64,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_platform_emotes")]
    pub platform_emotes: Vec<String>,
    #[serde(default = "default_stopwords")]
    pub stopwords: Vec<String>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention(),
            rate_window_secs: default_rate_window(),
            sentiment_window_secs: default_sentiment_window(),
            returning_gap_secs: default_returning_gap(),
            top_n: default_top_n(),
            platform_emotes: default_platform_emotes(),
            stopwords: default_stopwords(),
        }
    }
}

impl WindowConfig {
    pub fn retention(&self) -> Duration {
        Duration::seconds(self.retention_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BaselineConfig {
    #[serde(default = "default_tau_short")]
    pub tau_short_secs: f64,
    #[serde(default = "default_tau_long")]
    pub tau_long_secs: f64,
    #[serde(default = "default_ready_secs")]
    pub ready_secs: f64,
    #[serde(default = "default_min_dt")]
    pub min_dt_secs: f64,
    #[serde(default = "default_elapsed_cap_factor")]
    pub elapsed_cap_factor: f64,
    #[serde(default = "default_min_long")]
    pub min_long: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            tau_short_secs: 20.0,
            tau_long_secs: 180.0,
            ready_secs: 90.0,
            min_dt_secs: 0.25,
            elapsed_cap_factor: 12.0,
            min_long: 0.1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpikeConfig {
    #[serde(default = "default_ready_threshold")]
    pub ready_threshold: f64,
    #[serde(default = "default_warmup_threshold")]
    pub warmup_threshold: f64,
    #[serde(default = "default_rearm")]
    pub rearm_secs: i64,
    #[serde(default = "default_spike_history")]
    pub history: usize,
}

impl Default for SpikeConfig {
    fn default() -> Self {
        Self {
            ready_threshold: 1.4,
            warmup_threshold: 1.8,
            rearm_secs: 20,
            history: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertingConfig {
    #[serde(default)]
    pub cooldowns: CooldownConfig,
    #[serde(default = "default_idle_calm")]
    pub idle_calm_secs: i64,
    #[serde(default = "default_calm_cooldown")]
    pub calm_cooldown_secs: i64,
    /// Age after which emitted alerts drop out of the presented set
    #[serde(default = "default_history")]
    pub history_secs: i64,
    #[serde(default = "default_batch_window")]
    pub batch_window_secs: i64,
    #[serde(default = "default_recent_window")]
    pub recent_window_secs: i64,
    #[serde(default = "default_dip_window")]
    pub dip_window_secs: i64,
    #[serde(default = "default_newcomer_window")]
    pub newcomer_window_secs: i64,
    #[serde(default = "default_min_session_age")]
    pub min_session_age_secs: f64,
    #[serde(default = "default_min_positive_chatters")]
    pub min_positive_chatters: usize,
    #[serde(default = "default_min_positive_count")]
    pub min_positive_count: usize,
    #[serde(default = "default_min_surge_rate")]
    pub min_surge_rate: f64,
    #[serde(default = "default_min_momentum_baseline")]
    pub min_momentum_baseline: f64,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            cooldowns: CooldownConfig::default(),
            idle_calm_secs: default_idle_calm(),
            calm_cooldown_secs: default_calm_cooldown(),
            history_secs: default_history(),
            batch_window_secs: default_batch_window(),
            recent_window_secs: default_recent_window(),
            dip_window_secs: default_dip_window(),
            newcomer_window_secs: default_newcomer_window(),
            min_session_age_secs: default_min_session_age(),
            min_positive_chatters: default_min_positive_chatters(),
            min_positive_count: default_min_positive_count(),
            min_surge_rate: default_min_surge_rate(),
            min_momentum_baseline: default_min_momentum_baseline(),
        }
    }
}

impl AlertingConfig {
    /// Base cooldown for a detector, before intensity scaling.
    pub fn cooldown_for(&self, kind: DetectorKind) -> Duration {
        let c = &self.cooldowns;
        let secs = match kind {
            DetectorKind::NewcomerSurge => c.newcomer_secs,
            DetectorKind::ReturningAudience => c.returning_secs,
            DetectorKind::VelocitySurge => c.velocity_secs,
            DetectorKind::HypeSpike | DetectorKind::HumorSpike | DetectorKind::SupportSpike => {
                c.positive_secs
            }
            DetectorKind::ConstructiveFeedback => c.constructive_secs,
            DetectorKind::SpamWarning => c.spam_secs,
            DetectorKind::ToneDip => c.tone_dip_secs,
            DetectorKind::MomentumDrop => c.momentum_secs,
            DetectorKind::Calm => self.calm_cooldown_secs,
        };
        Duration::seconds(secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CooldownConfig {
    #[serde(default = "default_cd_newcomer")]
    pub newcomer_secs: i64,
    #[serde(default = "default_cd_returning")]
    pub returning_secs: i64,
    #[serde(default = "default_cd_velocity")]
    pub velocity_secs: i64,
    #[serde(default = "default_cd_positive")]
    pub positive_secs: i64,
    #[serde(default = "default_cd_constructive")]
    pub constructive_secs: i64,
    #[serde(default = "default_cd_spam")]
    pub spam_secs: i64,
    #[serde(default = "default_cd_tone_dip")]
    pub tone_dip_secs: i64,
    #[serde(default = "default_cd_momentum")]
    pub momentum_secs: i64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            newcomer_secs: 120,
            returning_secs: 300,
            velocity_secs: 90,
            positive_secs: 120,
            constructive_secs: 180,
            spam_secs: 60,
            tone_dip_secs: 90,
            momentum_secs: 180,
        }
    }
}

/// Where the remote classifier's quota breaker lives
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BreakerScope {
    #[default]
    Channel,
    Process,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_classifier_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_quota_cooldown")]
    pub quota_cooldown_secs: i64,
    #[serde(default = "default_context_messages")]
    pub context_messages: usize,
    /// Concurrent classifier calls per channel
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default)]
    pub breaker_scope: BreakerScope,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            api_key: None,
            timeout_ms: default_classifier_timeout(),
            quota_cooldown_secs: default_quota_cooldown(),
            context_messages: default_context_messages(),
            max_in_flight: default_max_in_flight(),
            breaker_scope: BreakerScope::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SinkConfig {
    #[serde(default = "default_true")]
    pub stdout: bool,
    /// Also forward aggregated snapshots, not just alerts
    #[serde(default = "default_true")]
    pub snapshots: bool,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            snapshots: true,
            webhook: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    pub url: String,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub priority_filter: Vec<Priority>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        // Expand environment variables
        let expanded = expand_env_vars(content)?;

        let config: Config =
            toml::from_str(&expanded).with_context(|| "Failed to parse configuration")?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let b = &self.baseline;
        for (field, value) in [
            ("baseline.tau_short_secs", b.tau_short_secs),
            ("baseline.tau_long_secs", b.tau_long_secs),
            ("baseline.ready_secs", b.ready_secs),
            ("baseline.min_dt_secs", b.min_dt_secs),
            ("baseline.elapsed_cap_factor", b.elapsed_cap_factor),
        ] {
            if !value.is_finite() || value <= 0.0 || value > MAX_DURATION_SECS as f64 {
                bail!("{} must be positive and at most {}", field, MAX_DURATION_SECS);
            }
        }
        if b.tau_short_secs > b.tau_long_secs {
            bail!("baseline.tau_short_secs must not exceed tau_long_secs");
        }
        if !b.min_long.is_finite() || b.min_long < 0.0 {
            bail!("baseline.min_long must be a non-negative number");
        }

        let s = &self.spike;
        if !s.ready_threshold.is_finite() || !s.warmup_threshold.is_finite() {
            bail!("spike thresholds must be finite");
        }
        if s.ready_threshold < 1.0 || s.warmup_threshold < 1.0 {
            bail!("spike thresholds are ratios and must be at least 1.0");
        }
        check_secs("spike.rearm_secs", s.rearm_secs)?;
        if s.history == 0 {
            bail!("spike.history must be positive");
        }

        let w = &self.window;
        check_secs("window.retention_secs", w.retention_secs)?;
        check_secs("window.rate_window_secs", w.rate_window_secs)?;
        check_secs("window.sentiment_window_secs", w.sentiment_window_secs)?;
        check_secs("window.returning_gap_secs", w.returning_gap_secs)?;
        if w.rate_window_secs > w.retention_secs || w.sentiment_window_secs > w.retention_secs {
            bail!("window.retention_secs must cover the rate and sentiment windows");
        }
        if w.top_n == 0 || w.top_n > 100 {
            bail!("window.top_n must be between 1 and 100");
        }

        let a = &self.alerting;
        check_secs("alerting.idle_calm_secs", a.idle_calm_secs)?;
        check_secs("alerting.calm_cooldown_secs", a.calm_cooldown_secs)?;
        check_secs("alerting.history_secs", a.history_secs)?;
        check_secs("alerting.batch_window_secs", a.batch_window_secs)?;
        check_secs("alerting.recent_window_secs", a.recent_window_secs)?;
        check_secs("alerting.dip_window_secs", a.dip_window_secs)?;
        check_secs("alerting.newcomer_window_secs", a.newcomer_window_secs)?;
        if !a.min_session_age_secs.is_finite() || a.min_session_age_secs < 0.0 {
            bail!("alerting.min_session_age_secs must be a non-negative number");
        }
        if !a.min_surge_rate.is_finite() || !a.min_momentum_baseline.is_finite() {
            bail!("alerting rate floors must be finite");
        }

        let c = &a.cooldowns;
        check_secs("alerting.cooldowns.newcomer_secs", c.newcomer_secs)?;
        check_secs("alerting.cooldowns.returning_secs", c.returning_secs)?;
        check_secs("alerting.cooldowns.velocity_secs", c.velocity_secs)?;
        check_secs("alerting.cooldowns.positive_secs", c.positive_secs)?;
        check_secs("alerting.cooldowns.constructive_secs", c.constructive_secs)?;
        check_secs("alerting.cooldowns.spam_secs", c.spam_secs)?;
        check_secs("alerting.cooldowns.tone_dip_secs", c.tone_dip_secs)?;
        check_secs("alerting.cooldowns.momentum_secs", c.momentum_secs)?;

        if self.agent.tick_secs == 0 || self.agent.tick_secs > MAX_DURATION_SECS as u64 {
            bail!("agent.tick_secs must be between 1 and {}", MAX_DURATION_SECS);
        }
        if self.agent.channel_queue == 0 {
            bail!("agent.channel_queue must be positive");
        }

        let k = &self.classifier;
        if k.enabled && k.endpoint.is_none() {
            bail!("classifier.enabled requires classifier.endpoint");
        }
        if k.timeout_ms == 0 || k.timeout_ms > 60_000 {
            bail!("classifier.timeout_ms must be between 1 and 60000");
        }
        check_secs("classifier.quota_cooldown_secs", k.quota_cooldown_secs)?;
        if k.max_in_flight == 0 {
            bail!("classifier.max_in_flight must be positive");
        }
        Ok(())
    }
}

fn check_secs(field: &str, value: i64) -> Result<()> {
    if value <= 0 || value > MAX_DURATION_SECS {
        bail!("{} must be between 1 and {} seconds", field, MAX_DURATION_SECS);
    }
    Ok(())
}

/// Expand ${ENV_VAR} references in config string
fn expand_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .to_string())
}

// Default value functions
fn default_instance() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
fn default_log_level() -> String { "info".to_string() }
fn default_tick() -> u64 { 5 }
fn default_channel_queue() -> usize { 1024 }
fn default_true() -> bool { true }
fn default_retention() -> i64 { 600 }
fn default_rate_window() -> i64 { 60 }
fn default_sentiment_window() -> i64 { 300 }
fn default_returning_gap() -> i64 { 900 }
fn default_top_n() -> usize { 6 }
fn default_platform_emotes() -> Vec<String> {
    ["Kappa", "PogChamp", "LUL", "KEKW", "Pog", "monkaS", "BibleThump", "Kreygasm", "ResidentSleeper", "4Head"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_stopwords() -> Vec<String> {
    ["the", "a", "an", "and", "or", "is", "it", "to", "of", "in", "on", "at", "for", "this",
     "that", "i", "you", "he", "she", "we", "they", "me", "my", "your", "be", "are", "was",
     "so", "just", "im", "its", "with", "but", "not", "do", "what", "have"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_tau_short() -> f64 { 20.0 }
fn default_tau_long() -> f64 { 180.0 }
fn default_ready_secs() -> f64 { 90.0 }
fn default_min_dt() -> f64 { 0.25 }
fn default_elapsed_cap_factor() -> f64 { 12.0 }
fn default_min_long() -> f64 { 0.1 }
fn default_ready_threshold() -> f64 { 1.4 }
fn default_warmup_threshold() -> f64 { 1.8 }
fn default_rearm() -> i64 { 20 }
fn default_spike_history() -> usize { 20 }
fn default_idle_calm() -> i64 { 90 }
fn default_calm_cooldown() -> i64 { 300 }
fn default_history() -> i64 { 600 }
fn default_batch_window() -> i64 { 60 }
fn default_recent_window() -> i64 { 30 }
fn default_dip_window() -> i64 { 45 }
fn default_newcomer_window() -> i64 { 60 }
fn default_min_session_age() -> f64 { 120.0 }
fn default_min_positive_chatters() -> usize { 3 }
fn default_min_positive_count() -> usize { 3 }
fn default_min_surge_rate() -> f64 { 5.0 }
fn default_min_momentum_baseline() -> f64 { 3.0 }
fn default_cd_newcomer() -> i64 { 120 }
fn default_cd_returning() -> i64 { 300 }
fn default_cd_velocity() -> i64 { 90 }
fn default_cd_positive() -> i64 { 120 }
fn default_cd_constructive() -> i64 { 180 }
fn default_cd_spam() -> i64 { 60 }
fn default_cd_tone_dip() -> i64 { 90 }
fn default_cd_momentum() -> i64 { 180 }
fn default_classifier_timeout() -> u64 { 1500 }
fn default_quota_cooldown() -> i64 { 900 }
fn default_context_messages() -> usize { 5 }
fn default_max_in_flight() -> usize { 4 }
