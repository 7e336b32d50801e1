use std::collections::BTreeSet;

use crate::types::{AlertTone, CandidateAlert, DetectorKind, Priority};
use crate::window::AuthorStatus;
use super::{Detector, EvalContext};

/// First-time chatters within the newcomer window.
/// A lone newcomer is keyed per author so each one is greeted once.
pub struct NewcomerSurge;

impl Detector for NewcomerSurge {
    fn kind(&self) -> DetectorKind { DetectorKind::NewcomerSurge }

    fn detect(&self, ctx: &EvalContext<'_>) -> Option<CandidateAlert> {
        let fresh: BTreeSet<&str> = ctx
            .within(ctx.settings.newcomer_window_secs)
            .filter(|m| m.status == AuthorStatus::First)
            .map(|m| m.record.author.as_str())
            .collect();

        let count = fresh.len();
        if count == 0 {
            return None;
        }

        let priority = match count {
            n if n >= 6 => Priority::High,
            n if n >= 3 => Priority::Medium,
            _ => Priority::Low,
        };

        let (author, message) = if count == 1 {
            let author = fresh.iter().next().map(|a| a.to_string());
            (author, "A first-time chatter just joined the conversation".to_string())
        } else {
            (None, format!("{} first-time chatters joined in the last minute", count))
        };

        Some(CandidateAlert {
            kind: self.kind(),
            author,
            message,
            tone: AlertTone::Positive,
            priority,
            timestamp: ctx.latest(),
            intensity: count as f64 / 3.0,
        })
    }
}

/// Known chatters coming back after a long silence
pub struct ReturningAudience;

impl Detector for ReturningAudience {
    fn kind(&self) -> DetectorKind { DetectorKind::ReturningAudience }

    fn detect(&self, ctx: &EvalContext<'_>) -> Option<CandidateAlert> {
        let back: BTreeSet<&str> = ctx
            .within(ctx.settings.newcomer_window_secs)
            .filter(|m| m.status == AuthorStatus::Returning)
            .map(|m| m.record.author.as_str())
            .collect();

        let message = match back.len() {
            0 => return None,
            1 => "A returning viewer is back in chat".to_string(),
            n => format!("{} returning viewers are back in chat", n),
        };

        Some(CandidateAlert {
            kind: self.kind(),
            author: None,
            message,
            tone: AlertTone::Neutral,
            priority: Priority::Low,
            timestamp: ctx.latest(),
            intensity: back.len() as f64 / 2.0,
        })
    }
}
