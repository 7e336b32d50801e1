use crate::types::{AlertTone, CandidateAlert, DetectorKind, Priority, Tone};
use super::{BatchMessage, Detector, EvalContext};

/// Sentiment at or below which a message counts toward a broad tone dip
const NEGATIVE_SENTIMENT: f64 = -0.35;

/// A burst of one positive tone (hype, humor or support).
///
/// Gated on session age and audience size so a near-empty room does not
/// trigger it, and suppressed by any negative tone in the recent window.
pub struct PositiveSpike {
    tone: Tone,
}

impl PositiveSpike {
    pub fn new(tone: Tone) -> Self {
        Self { tone }
    }

    fn describe(&self, count: usize) -> String {
        match self.tone {
            Tone::Hype => format!("Hype is building: {} hype messages in the last minute", count),
            Tone::Humor => format!("Chat is laughing along ({} jokes and reactions)", count),
            _ => format!("Viewers are showing support ({} supportive messages)", count),
        }
    }
}

impl Detector for PositiveSpike {
    fn kind(&self) -> DetectorKind {
        match self.tone {
            Tone::Hype => DetectorKind::HypeSpike,
            Tone::Humor => DetectorKind::HumorSpike,
            _ => DetectorKind::SupportSpike,
        }
    }

    fn detect(&self, ctx: &EvalContext<'_>) -> Option<CandidateAlert> {
        let s = ctx.settings;
        if ctx.session_age_secs < s.min_session_age_secs
            || ctx.metrics.unique_chatters < s.min_positive_chatters
            || ctx.recent.negative() > 0
        {
            return None;
        }

        let count = ctx.batch.count(self.tone);
        if count < s.min_positive_count {
            return None;
        }

        let ratio = ctx.batch.ratio(self.tone);
        let priority = if count >= 8 && ratio >= 0.5 {
            Priority::High
        } else if ratio >= 0.35 {
            Priority::Medium
        } else {
            Priority::Low
        };

        Some(CandidateAlert {
            kind: self.kind(),
            author: None,
            message: self.describe(count),
            tone: AlertTone::Positive,
            priority,
            timestamp: ctx.latest(),
            intensity: count as f64 / s.min_positive_count.max(1) as f64,
        })
    }
}

/// Viewers offering suggestions, unless toxicity drowns them out
pub struct ConstructiveFeedback;

impl Detector for ConstructiveFeedback {
    fn kind(&self) -> DetectorKind { DetectorKind::ConstructiveFeedback }

    fn detect(&self, ctx: &EvalContext<'_>) -> Option<CandidateAlert> {
        let count = ctx.batch.count(Tone::Constructive);
        if count < 2 || ctx.batch.count(Tone::Toxic) >= count {
            return None;
        }

        let priority = if count >= 4 { Priority::Medium } else { Priority::Low };
        Some(CandidateAlert {
            kind: self.kind(),
            author: None,
            message: format!("{} viewers are offering suggestions, worth a look", count),
            tone: AlertTone::Neutral,
            priority,
            timestamp: ctx.latest(),
            intensity: count as f64 / 2.0,
        })
    }
}

/// Promotion and link spam
pub struct SpamWarning;

impl Detector for SpamWarning {
    fn kind(&self) -> DetectorKind { DetectorKind::SpamWarning }

    fn detect(&self, ctx: &EvalContext<'_>) -> Option<CandidateAlert> {
        let count = ctx.batch.count(Tone::Spam);
        if count < 2 {
            return None;
        }

        let priority = if count >= 3 { Priority::High } else { Priority::Medium };
        Some(CandidateAlert {
            kind: self.kind(),
            author: None,
            message: format!("Possible spam: {} messages look like promotion or link spam", count),
            tone: AlertTone::Negative,
            priority,
            timestamp: ctx.latest(),
            intensity: count as f64 / 3.0,
        })
    }
}

/// Negative turn in chat mood.
///
/// Toxic messages in the recent window take precedence and escalate on
/// volume or strongly negative sentiment; otherwise a broader critical or
/// negative-sentiment signal over the dip window is reported.
pub struct ToneDip;

fn mean_sentiment<'m, 'r: 'm>(messages: impl Iterator<Item = &'m BatchMessage<'r>>) -> Option<f64> {
    let (sum, n) = messages.fold((0.0, 0usize), |(sum, n), m| (sum + m.record.sentiment, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

impl Detector for ToneDip {
    fn kind(&self) -> DetectorKind { DetectorKind::ToneDip }

    fn detect(&self, ctx: &EvalContext<'_>) -> Option<CandidateAlert> {
        let recent_secs = ctx.settings.recent_window_secs;
        let toxic: Vec<&BatchMessage<'_>> = ctx.within(recent_secs).filter(|m| m.tone == Tone::Toxic).collect();

        if !toxic.is_empty() {
            let sentiment = mean_sentiment(ctx.within(recent_secs)).unwrap_or(0.0);
            let severe = toxic.len() >= 2 || sentiment <= -0.5;
            let (priority, message) = if severe {
                (
                    Priority::High,
                    format!("Toxicity is rising: {} toxic messages in the last {}s", toxic.len(), recent_secs),
                )
            } else {
                (Priority::Medium, "A toxic message just showed up in chat".to_string())
            };
            return Some(CandidateAlert {
                kind: self.kind(),
                author: None,
                message,
                tone: AlertTone::Negative,
                priority,
                timestamp: toxic.iter().map(|m| m.record.timestamp).max().unwrap_or(ctx.now),
                intensity: toxic.len() as f64 + (-sentiment).max(0.0),
            });
        }

        let dip_secs = ctx.settings.dip_window_secs;
        let negative: Vec<&BatchMessage<'_>> = ctx
            .within(dip_secs)
            .filter(|m| m.tone.is_negative() || m.record.sentiment <= NEGATIVE_SENTIMENT)
            .collect();
        if negative.len() < 2 {
            return None;
        }

        let sentiment = mean_sentiment(ctx.within(dip_secs)).unwrap_or(0.0);
        let priority = if negative.len() >= 4 || sentiment <= -0.4 {
            Priority::Medium
        } else {
            Priority::Low
        };

        Some(CandidateAlert {
            kind: self.kind(),
            author: None,
            message: format!("Mood is dipping: {} critical or negative messages", negative.len()),
            tone: AlertTone::Negative,
            priority,
            timestamp: negative.iter().map(|m| m.record.timestamp).max().unwrap_or(ctx.now),
            intensity: negative.len() as f64 / 2.0,
        })
    }
}
