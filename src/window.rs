use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};

use crate::config::WindowConfig;
use crate::error::RecordError;
use crate::types::{AggregatedSnapshot, AuthorKey, ChatRecord, RankedTerm};

/// How an author stood when a message was ingested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorStatus {
    /// First message this session
    First,
    /// Known author speaking again after the returning gap
    Returning,
    Regular,
}

/// A buffered message plus the author status observed at ingest
#[derive(Debug, Clone)]
pub struct WindowEntry {
    pub record: ChatRecord,
    pub status: AuthorStatus,
}

/// Rolling in-memory window of one channel's recent messages.
///
/// Every snapshot field is recomputed from the buffer; only the per-author
/// first/last seen times outlive eviction, and those are cleared on `reset`.
pub struct WindowAggregator {
    channel: String,
    retention: Duration,
    rate_window: Duration,
    sentiment_window: Duration,
    returning_gap: Duration,
    top_n: usize,
    platform_emotes: HashSet<String>,
    buffer: VecDeque<WindowEntry>,
    first_seen: HashMap<AuthorKey, DateTime<Utc>>,
    last_seen: HashMap<AuthorKey, DateTime<Utc>>,
    clock: Option<DateTime<Utc>>,
}

impl WindowAggregator {
    pub fn new(channel: &str, config: &WindowConfig) -> Self {
        Self {
            channel: channel.to_string(),
            retention: config.retention(),
            rate_window: Duration::seconds(config.rate_window_secs),
            sentiment_window: Duration::seconds(config.sentiment_window_secs),
            returning_gap: Duration::seconds(config.returning_gap_secs),
            top_n: config.top_n,
            platform_emotes: config.platform_emotes.iter().map(|e| e.to_lowercase()).collect(),
            buffer: VecDeque::new(),
            first_seen: HashMap::new(),
            last_seen: HashMap::new(),
            clock: None,
        }
    }

    /// Latest timestamp observed, from records or explicit snapshots.
    pub fn clock(&self) -> Option<DateTime<Utc>> {
        self.clock
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Add a record and return metrics relative to the newest timestamp seen.
    pub fn ingest(&mut self, record: ChatRecord) -> Result<AggregatedSnapshot, RecordError> {
        validate(&record)?;

        let now = match self.clock {
            Some(clock) if clock > record.timestamp => {
                if clock - record.timestamp > self.retention {
                    return Err(RecordError::Stale { id: record.id });
                }
                clock
            }
            _ => record.timestamp,
        };

        let status = self.observe_author(&record.author, record.timestamp);
        self.buffer.push_back(WindowEntry { record, status });
        self.clock = Some(now);
        self.evict(now);

        Ok(self.compute(now))
    }

    /// Metrics at `now` without a new record; silence decays the rate.
    pub fn snapshot_at(&mut self, now: DateTime<Utc>) -> AggregatedSnapshot {
        let now = match self.clock {
            Some(clock) if clock > now => clock,
            _ => now,
        };
        self.clock = Some(now);
        self.evict(now);
        self.compute(now)
    }

    /// Buffered entries with `timestamp >= cutoff`, oldest first.
    pub fn entries_since(&self, cutoff: DateTime<Utc>) -> impl Iterator<Item = &WindowEntry> {
        self.buffer.iter().filter(move |e| e.record.timestamp >= cutoff)
    }

    pub fn get(&self, id: &str) -> Option<&WindowEntry> {
        self.buffer.iter().rev().find(|e| e.record.id == id)
    }

    /// Texts of up to `n` messages buffered before `id`, oldest first.
    pub fn context_before(&self, id: &str, n: usize) -> Vec<String> {
        let Some(pos) = self.buffer.iter().position(|e| e.record.id == id) else {
            return Vec::new();
        };
        let start = pos.saturating_sub(n);
        self.buffer
            .range(start..pos)
            .map(|e| e.record.text.clone())
            .collect()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.first_seen.clear();
        self.last_seen.clear();
        self.clock = None;
    }

    fn observe_author(&mut self, author: &str, at: DateTime<Utc>) -> AuthorStatus {
        let status = match self.last_seen.get(author) {
            None => AuthorStatus::First,
            Some(prev) if at - *prev >= self.returning_gap => AuthorStatus::Returning,
            Some(_) => AuthorStatus::Regular,
        };

        let first = self.first_seen.entry(author.to_string()).or_insert(at);
        if at < *first {
            *first = at;
        }
        let last = self.last_seen.entry(author.to_string()).or_insert(at);
        if at > *last {
            *last = at;
        }
        status
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        let horizon = now - self.retention;
        self.buffer.retain(|e| e.record.timestamp >= horizon);
    }

    fn compute(&self, now: DateTime<Utc>) -> AggregatedSnapshot {
        let rate_cutoff = now - self.rate_window;
        let sentiment_cutoff = now - self.sentiment_window;
        let horizon = now - self.retention;

        let message_rate = self
            .buffer
            .iter()
            .filter(|e| e.record.timestamp >= rate_cutoff)
            .count();

        let (sum, n) = self
            .buffer
            .iter()
            .filter(|e| e.record.timestamp >= sentiment_cutoff)
            .fold((0.0, 0usize), |(sum, n), e| (sum + e.record.sentiment, n + 1));
        let sentiment = (sum / n.max(1) as f64).clamp(-1.0, 1.0);

        let unique_chatters = self
            .buffer
            .iter()
            .map(|e| e.record.author.as_str())
            .collect::<HashSet<_>>()
            .len();

        let newcomers = self.first_seen.values().filter(|t| **t >= horizon).count();

        let (top_tokens, top_emotes) = self.rank_terms();

        let mut snapshot = AggregatedSnapshot::empty(&self.channel, now);
        snapshot.message_rate = message_rate;
        snapshot.sentiment = sentiment;
        snapshot.unique_chatters = unique_chatters;
        snapshot.newcomers = newcomers;
        snapshot.top_tokens = top_tokens;
        snapshot.top_emotes = top_emotes;
        snapshot
    }

    /// Top tokens and emotes over the whole buffer.
    ///
    /// Tokens that are platform emotes, emotes attached to the same message,
    /// or the code/id of a selected top emote are not ranked as tokens.
    fn rank_terms(&self) -> (Vec<RankedTerm>, Vec<RankedTerm>) {
        let mut tokens = Tally::default();
        let mut emotes = Tally::default();
        let mut emote_aliases: HashMap<String, (String, Option<String>)> = HashMap::new();

        for entry in &self.buffer {
            let record = &entry.record;
            let attached: HashSet<String> =
                record.emotes.iter().map(|e| e.code.to_lowercase()).collect();

            for emote in &record.emotes {
                let key = emote.key().to_string();
                emote_aliases
                    .entry(key.clone())
                    .or_insert_with(|| (emote.code.clone(), emote.id.clone()));
                emotes.bump(&key);
            }

            for token in &record.tokens {
                let lower = token.to_lowercase();
                if self.platform_emotes.contains(&lower) || attached.contains(&lower) {
                    continue;
                }
                tokens.bump(&lower);
            }
        }

        let top_emotes: Vec<(String, usize)> = emotes.ranked().take(self.top_n).collect();

        let mut selected = HashSet::new();
        for (key, _) in &top_emotes {
            selected.insert(key.to_lowercase());
            if let Some((code, id)) = emote_aliases.get(key) {
                selected.insert(code.to_lowercase());
                if let Some(id) = id {
                    selected.insert(id.to_lowercase());
                }
            }
        }

        let top_tokens = tokens
            .ranked()
            .filter(|(term, _)| !selected.contains(term))
            .take(self.top_n)
            .map(|(term, count)| RankedTerm { term, count })
            .collect();

        let top_emotes = top_emotes
            .into_iter()
            .map(|(key, count)| {
                let term = emote_aliases
                    .get(&key)
                    .map(|(code, _)| code.clone())
                    .unwrap_or(key);
                RankedTerm { term, count }
            })
            .collect();

        (top_tokens, top_emotes)
    }
}

fn validate(record: &ChatRecord) -> Result<(), RecordError> {
    if record.id.trim().is_empty() {
        return Err(RecordError::MissingField("id"));
    }
    if record.author.trim().is_empty() {
        return Err(RecordError::MissingField("author"));
    }
    if !record.sentiment.is_finite() || !(-1.0..=1.0).contains(&record.sentiment) {
        return Err(RecordError::OutOfRange {
            field: "sentiment",
            value: record.sentiment,
        });
    }
    if !record.tone_confidence.is_finite() || !(0.0..=1.0).contains(&record.tone_confidence) {
        return Err(RecordError::OutOfRange {
            field: "tone_confidence",
            value: record.tone_confidence,
        });
    }
    Ok(())
}

/// Occurrence counter that remembers first-encounter order
#[derive(Default)]
struct Tally {
    index: HashMap<String, usize>,
    counts: Vec<(String, usize)>,
}

impl Tally {
    fn bump(&mut self, term: &str) {
        match self.index.get(term) {
            Some(&i) => self.counts[i].1 += 1,
            None => {
                self.index.insert(term.to_string(), self.counts.len());
                self.counts.push((term.to_string(), 1));
            }
        }
    }

    /// Descending count; the stable sort keeps first-encounter order on ties.
    fn ranked(&self) -> impl Iterator<Item = (String, usize)> {
        let mut sorted = self.counts.clone();
        sorted.sort_by(|a, b| b.1.cmp(&a.1));
        sorted.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Emote, Tone};
    use chrono::TimeZone;
    use smallvec::{smallvec, SmallVec};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap()
    }

    fn record(id: &str, author: &str, at: DateTime<Utc>, tokens: &[&str]) -> ChatRecord {
        ChatRecord {
            id: id.into(),
            timestamp: at,
            author: author.into(),
            text: tokens.join(" "),
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            emotes: SmallVec::new(),
            sentiment: 0.0,
            tone: Tone::Neutral,
            tone_confidence: 0.5,
        }
    }

    fn aggregator() -> WindowAggregator {
        WindowAggregator::new("test", &WindowConfig::default())
    }

    #[test]
    fn rate_counts_only_trailing_minute() {
        let mut agg = aggregator();
        agg.ingest(record("1", "a", t0(), &["hello"])).unwrap();
        let snap = agg
            .ingest(record("2", "b", t0() + Duration::seconds(60), &["hi"]))
            .unwrap();
        assert_eq!(snap.message_rate, 2);

        let snap = agg
            .ingest(record("3", "c", t0() + Duration::seconds(61), &["yo"]))
            .unwrap();
        assert_eq!(snap.message_rate, 2);
        assert_eq!(snap.unique_chatters, 3);
    }

    #[test]
    fn evicts_beyond_retention_and_tracks_newcomers() {
        let mut agg = aggregator();
        agg.ingest(record("1", "a", t0(), &["early"])).unwrap();
        let snap = agg
            .ingest(record("2", "b", t0() + Duration::seconds(601), &["late"]))
            .unwrap();
        assert_eq!(agg.len(), 1);
        assert_eq!(snap.unique_chatters, 1);
        assert_eq!(snap.newcomers, 1);
    }

    #[test]
    fn sentiment_is_mean_over_five_minutes() {
        let mut agg = aggregator();
        let mut old = record("1", "a", t0(), &["bad"]);
        old.sentiment = -1.0;
        agg.ingest(old).unwrap();

        let mut r = record("2", "b", t0() + Duration::seconds(301), &["good"]);
        r.sentiment = 0.6;
        let snap = agg.ingest(r).unwrap();
        assert!((snap.sentiment - 0.6).abs() < 1e-9);
    }

    #[test]
    fn empty_snapshot_has_zero_sentiment() {
        let mut agg = aggregator();
        let snap = agg.snapshot_at(t0());
        assert_eq!(snap.sentiment, 0.0);
        assert!(snap.is_idle());
    }

    #[test]
    fn out_of_order_record_is_tolerated() {
        let mut agg = aggregator();
        agg.ingest(record("1", "a", t0() + Duration::seconds(30), &["x"])).unwrap();
        let snap = agg.ingest(record("2", "b", t0(), &["y"])).unwrap();
        assert_eq!(snap.timestamp, t0() + Duration::seconds(30));
        assert_eq!(snap.message_rate, 2);
    }

    #[test]
    fn rejects_stale_and_malformed_records_without_side_effects() {
        let mut agg = aggregator();
        agg.ingest(record("1", "a", t0() + Duration::seconds(700), &["x"])).unwrap();

        let err = agg.ingest(record("2", "b", t0(), &["y"])).unwrap_err();
        assert!(matches!(err, RecordError::Stale { .. }));

        let mut bad = record("3", "c", t0() + Duration::seconds(701), &["z"]);
        bad.sentiment = f64::NAN;
        assert!(agg.ingest(bad).is_err());

        assert_eq!(agg.len(), 1);
        let snap = agg.snapshot_at(t0() + Duration::seconds(701));
        assert_eq!(snap.unique_chatters, 1);
        assert_eq!(snap.newcomers, 1);
    }

    #[test]
    fn ranks_tokens_and_emotes_with_exclusions() {
        let mut agg = aggregator();
        let mut r1 = record("1", "a", t0(), &["clutch", "pepega", "kappa", "clutch"]);
        r1.emotes = smallvec![Emote { code: "Pepega".into(), id: None }];
        agg.ingest(r1).unwrap();

        let mut r2 = record("2", "b", t0() + Duration::seconds(1), &["pepega", "nice"]);
        r2.emotes = smallvec![Emote { code: "catJAM".into(), id: Some("pepega".into()) }];
        let snap = agg.ingest(r2).unwrap();

        let tokens: Vec<&str> = snap.top_tokens.iter().map(|t| t.term.as_str()).collect();
        // "kappa" is a platform emote; "pepega" collides with a top emote id.
        assert_eq!(tokens, vec!["clutch", "nice"]);
        assert_eq!(snap.top_tokens[0].count, 2);

        let emotes: Vec<&str> = snap.top_emotes.iter().map(|t| t.term.as_str()).collect();
        assert_eq!(emotes, vec!["Pepega", "catJAM"]);
    }

    #[test]
    fn ties_keep_first_encountered_order() {
        let mut agg = aggregator();
        agg.ingest(record("1", "a", t0(), &["zeta", "alpha"])).unwrap();
        let snap = agg
            .ingest(record("2", "b", t0() + Duration::seconds(1), &["alpha", "zeta"]))
            .unwrap();
        let tokens: Vec<&str> = snap.top_tokens.iter().map(|t| t.term.as_str()).collect();
        assert_eq!(tokens, vec!["zeta", "alpha"]);
    }

    #[test]
    fn marks_first_and_returning_authors() {
        let mut agg = aggregator();
        agg.ingest(record("1", "a", t0(), &["hi"])).unwrap();
        agg.ingest(record("2", "a", t0() + Duration::seconds(10), &["again"])).unwrap();
        agg.ingest(record("3", "a", t0() + Duration::seconds(1000), &["back"])).unwrap();

        let statuses: Vec<AuthorStatus> = agg.entries_since(t0()).map(|e| e.status).collect();
        assert_eq!(statuses, vec![AuthorStatus::Returning]);
        assert!(agg.get("3").is_some());
    }

    #[test]
    fn reset_clears_session_state() {
        let mut agg = aggregator();
        agg.ingest(record("1", "a", t0(), &["hi"])).unwrap();
        agg.reset();
        assert!(agg.is_empty());
        assert!(agg.clock().is_none());
        let snap = agg.ingest(record("2", "a", t0(), &["hi"])).unwrap();
        assert_eq!(snap.newcomers, 1);
        assert_eq!(agg.get("2").map(|e| e.status), Some(AuthorStatus::First));
    }
}
