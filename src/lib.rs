pub mod alerter;
pub mod analyzer;
pub mod baseline;
pub mod channel;
pub mod classifier;
pub mod config;
pub mod error;
pub mod sink;
pub mod source;
pub mod spike;
pub mod window;

/// Common types used across modules
pub mod types {
    use std::collections::BTreeMap;
    use std::str::FromStr;

    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use smallvec::SmallVec;
    use uuid::Uuid;

    /// Stable, anonymized author identity
    pub type AuthorKey = String;

    /// An emote occurrence attached to a chat message
    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Emote {
        pub code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub id: Option<String>,
    }

    impl Emote {
        /// Ranking key: the platform id when known, otherwise the code.
        pub fn key(&self) -> &str {
            self.id.as_deref().unwrap_or(&self.code)
        }
    }

    /// A single inbound chat message, immutable once built
    #[derive(Debug, Clone, Serialize)]
    pub struct ChatRecord {
        pub id: String,
        pub timestamp: DateTime<Utc>,
        pub author: AuthorKey,
        pub text: String,
        pub tokens: Vec<String>,
        pub emotes: SmallVec<[Emote; 4]>,
        pub sentiment: f64,
        pub tone: Tone,
        pub tone_confidence: f64,
    }

    /// Categorical affect/intent of a chat message
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Tone {
        Hype,
        Humor,
        Supportive,
        Constructive,
        Question,
        Critical,
        Toxic,
        Spam,
        Neutral,
    }

    impl Tone {
        pub const ALL: [Tone; 9] = [
            Tone::Hype,
            Tone::Humor,
            Tone::Supportive,
            Tone::Constructive,
            Tone::Question,
            Tone::Critical,
            Tone::Toxic,
            Tone::Spam,
            Tone::Neutral,
        ];

        pub fn is_positive(self) -> bool {
            matches!(self, Tone::Hype | Tone::Humor | Tone::Supportive)
        }

        pub fn is_negative(self) -> bool {
            matches!(self, Tone::Critical | Tone::Toxic)
        }

        pub fn as_str(self) -> &'static str {
            match self {
                Tone::Hype => "hype",
                Tone::Humor => "humor",
                Tone::Supportive => "supportive",
                Tone::Constructive => "constructive",
                Tone::Question => "question",
                Tone::Critical => "critical",
                Tone::Toxic => "toxic",
                Tone::Spam => "spam",
                Tone::Neutral => "neutral",
            }
        }
    }

    impl FromStr for Tone {
        type Err = crate::error::RecordError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            let label = s.trim().to_ascii_lowercase();
            Tone::ALL
                .iter()
                .copied()
                .find(|t| t.as_str() == label)
                .ok_or_else(|| crate::error::RecordError::UnknownTone(s.to_string()))
        }
    }

    impl std::fmt::Display for Tone {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.as_str())
        }
    }

    /// Overall affect of an alert
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum AlertTone {
        Positive,
        Neutral,
        Negative,
    }

    /// Alert priority levels
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Priority {
        Low,
        Medium,
        High,
    }

    impl Priority {
        pub fn weight(self) -> u8 {
            match self {
                Priority::Low => 1,
                Priority::Medium => 2,
                Priority::High => 3,
            }
        }
    }

    impl std::fmt::Display for Priority {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Priority::Low => write!(f, "LOW"),
                Priority::Medium => write!(f, "MEDIUM"),
                Priority::High => write!(f, "HIGH"),
            }
        }
    }

    /// Metric identifier
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum MetricId {
        MessageRate,
        Sentiment,
        UniqueChatters,
        Newcomers,
    }

    impl std::fmt::Display for MetricId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let s = match self {
                MetricId::MessageRate => "chat.message_rate",
                MetricId::Sentiment => "chat.sentiment",
                MetricId::UniqueChatters => "chat.unique_chatters",
                MetricId::Newcomers => "chat.newcomers",
            };
            write!(f, "{}", s)
        }
    }

    /// Identity of a heuristic detector in the alert battery
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum DetectorKind {
        NewcomerSurge,
        ReturningAudience,
        VelocitySurge,
        HypeSpike,
        HumorSpike,
        SupportSpike,
        ConstructiveFeedback,
        SpamWarning,
        ToneDip,
        MomentumDrop,
        Calm,
    }

    impl std::fmt::Display for DetectorKind {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let s = match self {
                DetectorKind::NewcomerSurge => "newcomer_surge",
                DetectorKind::ReturningAudience => "returning_audience",
                DetectorKind::VelocitySurge => "velocity_surge",
                DetectorKind::HypeSpike => "hype_spike",
                DetectorKind::HumorSpike => "humor_spike",
                DetectorKind::SupportSpike => "support_spike",
                DetectorKind::ConstructiveFeedback => "constructive_feedback",
                DetectorKind::SpamWarning => "spam_warning",
                DetectorKind::ToneDip => "tone_dip",
                DetectorKind::MomentumDrop => "momentum_drop",
                DetectorKind::Calm => "calm",
            };
            f.write_str(s)
        }
    }

    /// Read-only projection of a metric baseline
    #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
    pub struct BaselineSnapshot {
        pub short: f64,
        pub long: f64,
        pub std: f64,
        pub samples: u64,
        pub ready: bool,
    }

    /// A metric crossing its adaptive ratio threshold
    #[derive(Debug, Clone, Serialize)]
    pub struct SpikeEvent {
        pub id: Uuid,
        pub timestamp: DateTime<Utc>,
        pub metric: MetricId,
        pub value: f64,
        pub ratio_to_baseline: f64,
        pub threshold: f64,
    }

    /// Output of a single detector for one evaluation cycle
    #[derive(Debug, Clone)]
    pub struct CandidateAlert {
        pub kind: DetectorKind,
        /// Set when the detector keys its cooldown per author.
        pub author: Option<AuthorKey>,
        pub message: String,
        pub tone: AlertTone,
        pub priority: Priority,
        pub timestamp: DateTime<Utc>,
        /// Signal strength, shortens the cooldown when large.
        pub intensity: f64,
    }

    /// An alert that survived arbitration
    #[derive(Debug, Clone, Serialize)]
    pub struct EmittedAlert {
        pub id: Uuid,
        pub channel: String,
        pub kind: DetectorKind,
        pub message: String,
        pub tone: AlertTone,
        pub priority: Priority,
        pub timestamp: DateTime<Utc>,
    }

    /// A ranked token or emote with its occurrence count
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct RankedTerm {
        pub term: String,
        pub count: usize,
    }

    /// Point-in-time metrics for one channel
    #[derive(Debug, Clone, Serialize)]
    pub struct AggregatedSnapshot {
        pub channel: String,
        pub timestamp: DateTime<Utc>,
        pub message_rate: usize,
        pub sentiment: f64,
        pub unique_chatters: usize,
        pub newcomers: usize,
        pub top_tokens: Vec<RankedTerm>,
        pub top_emotes: Vec<RankedTerm>,
        pub baselines: BTreeMap<MetricId, BaselineSnapshot>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub spike: Option<SpikeEvent>,
    }

    impl AggregatedSnapshot {
        pub fn empty(channel: &str, timestamp: DateTime<Utc>) -> Self {
            Self {
                channel: channel.to_string(),
                timestamp,
                message_rate: 0,
                sentiment: 0.0,
                unique_chatters: 0,
                newcomers: 0,
                top_tokens: Vec::new(),
                top_emotes: Vec::new(),
                baselines: BTreeMap::new(),
                spike: None,
            }
        }

        /// Values fed to the baseline tracker on every sample.
        pub fn metric_values(&self) -> [(MetricId, f64); 4] {
            [
                (MetricId::MessageRate, self.message_rate as f64),
                (MetricId::Sentiment, self.sentiment),
                (MetricId::UniqueChatters, self.unique_chatters as f64),
                (MetricId::Newcomers, self.newcomers as f64),
            ]
        }

        pub fn is_idle(&self) -> bool {
            self.message_rate == 0 && self.unique_chatters == 0 && self.newcomers == 0
        }
    }
}
