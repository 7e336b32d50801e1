use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::types::{AuthorKey, DetectorKind, Priority};

/// Lower bound on a scaled cooldown, as a share of the base cooldown
const COOLDOWN_FLOOR: f64 = 0.3;

/// Identity used to decide whether two alerts are the same for suppression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    pub kind: DetectorKind,
    pub author: Option<AuthorKey>,
}

impl CooldownKey {
    pub fn new(kind: DetectorKind, author: Option<AuthorKey>) -> Self {
        Self { kind, author }
    }
}

#[derive(Debug, Clone)]
pub struct CooldownEntry {
    pub last_emitted_at: DateTime<Utc>,
    pub last_priority: Priority,
    /// Cooldown in effect when the entry was written
    pub cooldown: Duration,
}

/// Scale a base cooldown by signal intensity.
///
/// `base / (1 + clamp(intensity, 0.5, 4))`, never below 30% of `base`.
pub fn dynamic_cooldown(base: Duration, intensity: f64) -> Duration {
    let intensity = if intensity.is_finite() { intensity.clamp(0.5, 4.0) } else { 0.5 };
    let base_ms = base.num_milliseconds() as f64;
    let scaled = (base_ms / (1.0 + intensity)).max(base_ms * COOLDOWN_FLOOR);
    Duration::milliseconds(scaled.round() as i64)
}

/// Per-key emission bookkeeping for one channel
#[derive(Debug, Default)]
pub struct CooldownBook {
    entries: HashMap<CooldownKey, CooldownEntry>,
}

impl CooldownBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a candidate may be emitted.
    ///
    /// Admitted once `cooldown` has elapsed since the last emission for the
    /// key, or immediately when its priority is strictly higher.
    pub fn admit(&self, key: &CooldownKey, priority: Priority, cooldown: Duration, now: DateTime<Utc>) -> bool {
        match self.entries.get(key) {
            None => true,
            Some(entry) => now - entry.last_emitted_at >= cooldown || priority > entry.last_priority,
        }
    }

    pub fn record(&mut self, key: CooldownKey, priority: Priority, cooldown: Duration, now: DateTime<Utc>) {
        self.entries.insert(
            key,
            CooldownEntry {
                last_emitted_at: now,
                last_priority: priority,
                cooldown,
            },
        );
    }

    /// Whether the key is still inside the cooldown it was last emitted with.
    pub fn is_suppressed(&self, key: &CooldownKey, now: DateTime<Utc>) -> bool {
        self.entries
            .get(key)
            .map(|e| now - e.last_emitted_at < e.cooldown)
            .unwrap_or(false)
    }

    pub fn any_active(&self, now: DateTime<Utc>) -> bool {
        self.entries.values().any(|e| now - e.last_emitted_at < e.cooldown)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
