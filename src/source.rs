//! Inbound JSON-lines events and their conversion into `ChatRecord`s.
//!
//! Each line is one tagged object. Shapes are validated here once; anything
//! that does not match is rejected with a `RecordError`, never coerced.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use smallvec::SmallVec;

use crate::classifier::HeuristicClassifier;
use crate::config::WindowConfig;
use crate::error::RecordError;
use crate::types::{ChatRecord, Emote, Tone};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Chat(ChatEvent),
    Session(SessionEvent),
}

impl InboundEvent {
    pub fn channel(&self) -> &str {
        match self {
            InboundEvent::Chat(e) => &e.channel,
            InboundEvent::Session(e) => &e.channel,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatEvent {
    pub channel: String,
    pub id: String,
    pub author: String,
    pub text: String,
    pub timestamp: EventTime,
    #[serde(default)]
    pub emotes: Vec<EmoteSpan>,
    #[serde(default)]
    pub tone: Option<ToneAnnotation>,
    #[serde(default)]
    pub sentiment: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionEvent {
    pub channel: String,
    pub action: SessionAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAction {
    Start,
    End,
}

/// Epoch milliseconds or an RFC 3339 string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EventTime {
    Millis(i64),
    Text(String),
}

impl EventTime {
    pub fn to_utc(&self) -> Result<DateTime<Utc>, RecordError> {
        match self {
            EventTime::Millis(ms) => DateTime::<Utc>::from_timestamp_millis(*ms)
                .ok_or_else(|| RecordError::Timestamp(ms.to_string())),
            EventTime::Text(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| RecordError::Timestamp(format!("{}: {}", s, e))),
        }
    }
}

/// Emote occurrence; `code` may be omitted when the span locates it in the text.
/// Spans are character offsets, end exclusive.
#[derive(Debug, Clone, Deserialize)]
pub struct EmoteSpan {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub start: Option<usize>,
    #[serde(default)]
    pub end: Option<usize>,
}

/// Tone label supplied upstream
#[derive(Debug, Clone, Deserialize)]
pub struct ToneAnnotation {
    pub label: String,
    pub confidence: f64,
}

pub fn decode_line(line: &str) -> Result<InboundEvent, RecordError> {
    serde_json::from_str(line).map_err(|e| RecordError::Decode(e.to_string()))
}

/// Lower-cased word tokens without stopwords or single characters
pub fn tokenize(text: &str, stopwords: &HashSet<String>) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.chars().count() >= 2 && !stopwords.contains(w))
        .collect()
}

/// Turns decoded chat events into immutable records
pub struct RecordBuilder {
    stopwords: HashSet<String>,
    heuristic: Arc<HeuristicClassifier>,
}

impl RecordBuilder {
    pub fn new(config: &WindowConfig, heuristic: Arc<HeuristicClassifier>) -> Self {
        Self {
            stopwords: config.stopwords.iter().map(|w| w.to_lowercase()).collect(),
            heuristic,
        }
    }

    /// Returns the channel alongside the record.
    pub fn build(&self, event: ChatEvent) -> Result<(String, ChatRecord), RecordError> {
        if event.channel.trim().is_empty() {
            return Err(RecordError::MissingField("channel"));
        }
        if event.id.trim().is_empty() {
            return Err(RecordError::MissingField("id"));
        }
        if event.author.trim().is_empty() {
            return Err(RecordError::MissingField("author"));
        }

        let timestamp = event.timestamp.to_utc()?;
        let emotes = resolve_emotes(&event.text, &event.emotes)?;
        if event.text.trim().is_empty() && emotes.is_empty() {
            return Err(RecordError::MissingField("text"));
        }

        let (tone, tone_confidence) = match &event.tone {
            Some(annotation) => {
                let tone: Tone = annotation.label.parse()?;
                if !annotation.confidence.is_finite() || !(0.0..=1.0).contains(&annotation.confidence) {
                    return Err(RecordError::OutOfRange {
                        field: "tone.confidence",
                        value: annotation.confidence,
                    });
                }
                (tone, annotation.confidence)
            }
            None => {
                let verdict = self.heuristic.infer(&event.text);
                (verdict.tone, verdict.confidence)
            }
        };

        let sentiment = match event.sentiment {
            Some(s) if !s.is_finite() || !(-1.0..=1.0).contains(&s) => {
                return Err(RecordError::OutOfRange { field: "sentiment", value: s });
            }
            Some(s) => s,
            None => self.heuristic.sentiment(&event.text),
        };

        let record = ChatRecord {
            id: event.id,
            timestamp,
            author: event.author,
            tokens: tokenize(&event.text, &self.stopwords),
            text: event.text,
            emotes,
            sentiment,
            tone,
            tone_confidence,
        };
        Ok((event.channel, record))
    }
}

fn resolve_emotes(text: &str, spans: &[EmoteSpan]) -> Result<SmallVec<[Emote; 4]>, RecordError> {
    let len = text.chars().count();
    let mut emotes = SmallVec::new();
    for span in spans {
        let located = match (span.start, span.end) {
            (Some(start), Some(end)) => {
                if start >= end || end > len {
                    return Err(RecordError::EmoteSpan { start, end, len });
                }
                Some(text.chars().skip(start).take(end - start).collect::<String>())
            }
            _ => None,
        };
        let code = match (&span.code, located) {
            (Some(code), _) if !code.trim().is_empty() => code.clone(),
            (_, Some(located)) => located,
            _ => return Err(RecordError::MissingField("emotes.code")),
        };
        emotes.push(Emote { code, id: span.id.clone() });
    }
    Ok(emotes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn builder() -> RecordBuilder {
        RecordBuilder::new(&WindowConfig::default(), Arc::new(HeuristicClassifier::new().unwrap()))
    }

    fn chat(line: &str) -> ChatEvent {
        match decode_line(line).unwrap() {
            InboundEvent::Chat(e) => e,
            other => panic!("expected chat, got {:?}", other),
        }
    }

    #[test]
    fn decodes_both_timestamp_forms() {
        let a = chat(r#"{"type":"chat","channel":"c","id":"1","author":"a","text":"hi","timestamp":1772395200000}"#);
        let b = chat(r#"{"type":"chat","channel":"c","id":"2","author":"a","text":"hi","timestamp":"2026-03-01T20:00:00Z"}"#);
        let expected = Utc.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap();
        assert_eq!(a.timestamp.to_utc().unwrap(), expected);
        assert_eq!(b.timestamp.to_utc().unwrap(), expected);

        let bad = chat(r#"{"type":"chat","channel":"c","id":"3","author":"a","text":"hi","timestamp":"yesterday"}"#);
        assert!(matches!(builder().build(bad), Err(RecordError::Timestamp(_))));
    }

    #[test]
    fn rejects_unknown_event_types_and_missing_fields() {
        assert!(matches!(decode_line(r#"{"type":"raid","channel":"c"}"#), Err(RecordError::Decode(_))));
        assert!(matches!(decode_line(r#"{"type":"chat","channel":"c"}"#), Err(RecordError::Decode(_))));
        assert!(matches!(decode_line("not json"), Err(RecordError::Decode(_))));

        let session = decode_line(r#"{"type":"session","channel":"c","action":"start"}"#).unwrap();
        assert!(matches!(session, InboundEvent::Session(SessionEvent { action: SessionAction::Start, .. })));
        assert_eq!(session.channel(), "c");
    }

    #[test]
    fn annotation_overrides_heuristic_but_unknown_label_is_rejected() {
        let annotated = chat(
            r#"{"type":"chat","channel":"c","id":"1","author":"a","text":"ok","timestamp":0,"tone":{"label":"hype","confidence":0.9}}"#,
        );
        let (_, record) = builder().build(annotated).unwrap();
        assert_eq!(record.tone, Tone::Hype);
        assert!((record.tone_confidence - 0.9).abs() < 1e-9);

        let unknown = chat(
            r#"{"type":"chat","channel":"c","id":"1","author":"a","text":"ok","timestamp":0,"tone":{"label":"ecstatic","confidence":0.9}}"#,
        );
        assert!(matches!(builder().build(unknown), Err(RecordError::UnknownTone(_))));
    }

    #[test]
    fn heuristic_fills_tone_and_sentiment() {
        let spam = chat(
            r#"{"type":"chat","channel":"c","id":"1","author":"a","text":"free followers at bestsite.com","timestamp":0}"#,
        );
        let (channel, record) = builder().build(spam).unwrap();
        assert_eq!(channel, "c");
        assert_eq!(record.tone, Tone::Spam);

        let happy = chat(r#"{"type":"chat","channel":"c","id":"2","author":"a","text":"this is awesome","timestamp":0}"#);
        let (_, record) = builder().build(happy).unwrap();
        assert!(record.sentiment > 0.0);
    }

    #[test]
    fn emote_spans_are_resolved_and_checked() {
        let event = chat(
            r#"{"type":"chat","channel":"c","id":"1","author":"a","text":"nice Kappa","timestamp":0,"emotes":[{"id":"25","start":5,"end":10}]}"#,
        );
        let (_, record) = builder().build(event).unwrap();
        assert_eq!(record.emotes[0].code, "Kappa");
        assert_eq!(record.emotes[0].key(), "25");

        let event = chat(
            r#"{"type":"chat","channel":"c","id":"1","author":"a","text":"nice","timestamp":0,"emotes":[{"code":"Kappa","start":5,"end":10}]}"#,
        );
        assert!(matches!(builder().build(event), Err(RecordError::EmoteSpan { .. })));

        let empty = chat(r#"{"type":"chat","channel":"c","id":"1","author":"a","text":"  ","timestamp":0}"#);
        assert!(matches!(builder().build(empty), Err(RecordError::MissingField("text"))));
    }

    #[test]
    fn tokenizer_drops_stopwords_and_short_tokens() {
        let stop: HashSet<String> = ["the"].iter().map(|s| s.to_string()).collect();
        assert_eq!(tokenize("The BOSS is down! a 1 gg", &stop), vec!["boss", "is", "down", "gg"]);
    }
}
