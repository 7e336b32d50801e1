use crate::types::{AlertTone, CandidateAlert, DetectorKind, Priority};
use super::{Detector, EvalContext};

const SURGE_Z: f64 = 2.0;
const SURGE_PCT: f64 = 60.0;
const DROP_Z: f64 = -2.5;
const DROP_PCT: f64 = -60.0;
/// Share of recent messages that makes a surge read as negative
const NEGATIVE_SHARE: f64 = 0.25;

/// Message rate well above baseline.
///
/// Thresholds scale with audience size, and widen further while the baseline
/// is still warming up.
pub struct VelocitySurge;

impl Detector for VelocitySurge {
    fn kind(&self) -> DetectorKind { DetectorKind::VelocitySurge }

    fn detect(&self, ctx: &EvalContext<'_>) -> Option<CandidateAlert> {
        if (ctx.metrics.message_rate as f64) < ctx.settings.min_surge_rate {
            return None;
        }
        let (z, pct) = ctx.rate_deviation()?;

        let widen = if ctx.baseline.ready { 1.0 } else { 1.5 };
        let z_threshold = SURGE_Z * ctx.audience_scale() * widen;
        let pct_threshold = SURGE_PCT * ctx.audience_scale() * widen;
        if z < z_threshold && pct < pct_threshold {
            return None;
        }

        let intensity = (z / z_threshold).max(pct / pct_threshold);
        let negative = ctx.recent.negative_ratio() >= NEGATIVE_SHARE;
        let positive = ctx.recent.positive() > 0 && ctx.recent.negative() == 0;

        let (tone, priority, message) = if negative {
            let priority = if intensity >= 1.5 { Priority::High } else { Priority::Medium };
            (
                AlertTone::Negative,
                priority,
                format!("Chat sped up {:.0}% with a wave of negative messages", pct),
            )
        } else if positive {
            let priority = if intensity >= 2.0 { Priority::High } else { Priority::Medium };
            (
                AlertTone::Positive,
                priority,
                format!("Chat velocity is up {:.0}% and the mood is upbeat", pct),
            )
        } else {
            let priority = if intensity >= 2.0 { Priority::Medium } else { Priority::Low };
            (
                AlertTone::Neutral,
                priority,
                format!("Chat velocity is up {:.0}% over baseline, keep an eye on it", pct),
            )
        };

        Some(CandidateAlert {
            kind: self.kind(),
            author: None,
            message,
            tone,
            priority,
            timestamp: ctx.latest(),
            intensity,
        })
    }
}

/// Message rate well below an established baseline
pub struct MomentumDrop;

impl Detector for MomentumDrop {
    fn kind(&self) -> DetectorKind { DetectorKind::MomentumDrop }

    fn detect(&self, ctx: &EvalContext<'_>) -> Option<CandidateAlert> {
        if !ctx.baseline.ready || ctx.baseline.long < ctx.settings.min_momentum_baseline {
            return None;
        }
        let (z, pct) = ctx.rate_deviation()?;
        if z > DROP_Z && pct > DROP_PCT {
            return None;
        }

        let intensity = (z / DROP_Z).max(pct / DROP_PCT);
        let priority = if pct <= -80.0 { Priority::Medium } else { Priority::Low };

        Some(CandidateAlert {
            kind: self.kind(),
            author: None,
            message: format!("Chat momentum dropped {:.0}% below its usual pace", pct.abs()),
            tone: AlertTone::Negative,
            priority,
            timestamp: ctx.now,
            intensity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use crate::analyzer::EvalContext;
    use crate::config::AlertingConfig;
    use crate::types::{ChatRecord, Tone};
    use crate::window::AuthorStatus;
    use chrono::Duration;

    fn surge(tones: &[Tone], rate: usize, unique: usize) -> Option<CandidateAlert> {
        let settings = AlertingConfig::default();
        let base = baseline(10.0, 2.0, true);
        let metrics = metrics(rate, unique, 60);
        let records: Vec<ChatRecord> = (0..tones.len()).map(|i| record(i, "a", 55, 0.0)).collect();
        let msgs = batch(&records, tones, AuthorStatus::Regular);
        let ctx = EvalContext::new(t0() + Duration::seconds(60), &msgs, &metrics, &base, 600.0, &settings);
        VelocitySurge.detect(&ctx)
    }

    #[test]
    fn surge_sub_classifies_by_recent_tone() {
        let alert = surge(&[Tone::Hype, Tone::Neutral], 30, 4).unwrap();
        assert_eq!(alert.tone, AlertTone::Positive);

        let alert = surge(&[Tone::Toxic, Tone::Hype], 30, 4).unwrap();
        assert_eq!(alert.tone, AlertTone::Negative);

        let alert = surge(&[Tone::Neutral, Tone::Question], 30, 4).unwrap();
        assert_eq!(alert.tone, AlertTone::Neutral);
    }

    #[test]
    fn larger_audience_needs_larger_move() {
        // +60% and z = 3: enough for a handful of chatters, not for 999.
        assert!(surge(&[Tone::Neutral], 16, 1).is_some());
        assert!(surge(&[Tone::Neutral], 16, 999).is_none());
    }

    #[test]
    fn momentum_drop_requires_ready_baseline() {
        let settings = AlertingConfig::default();
        let metrics = metrics(1, 3, 60);
        let now = t0() + Duration::seconds(60);

        let ready = baseline(10.0, 2.0, true);
        let ctx = EvalContext::new(now, &[], &metrics, &ready, 600.0, &settings);
        let alert = MomentumDrop.detect(&ctx).unwrap();
        assert_eq!(alert.priority, Priority::Medium);
        assert_eq!(alert.message, "Chat momentum dropped 90% below its usual pace");

        let warming = baseline(10.0, 2.0, false);
        let ctx = EvalContext::new(now, &[], &metrics, &warming, 600.0, &settings);
        assert!(MomentumDrop.detect(&ctx).is_none());
    }
}
