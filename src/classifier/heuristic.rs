use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;

use crate::error::ClassifyError;
use crate::types::Tone;
use super::{ClassifyContext, ToneClassifier, ToneVerdict};

/// Keyword/regex tone inference. Synchronous and infallible, so it can stand
/// in for the remote classifier at any time.
pub struct HeuristicClassifier {
    patterns: Vec<TonePattern>,
    positive: HashSet<&'static str>,
    negative: HashSet<&'static str>,
}

struct TonePattern {
    tone: Tone,
    regex: Regex,
    confidence: f64,
}

const POSITIVE_WORDS: &[&str] = &[
    "love", "great", "awesome", "amazing", "good", "nice", "best", "fun", "happy", "beautiful",
    "cool", "wow", "pog", "poggers", "hype", "gg", "thanks", "thank", "lol", "lmao", "haha",
    "clutch", "wholesome", "cute", "epic", "win", "glad", "enjoy", "legend", "goat",
];

const NEGATIVE_WORDS: &[&str] = &[
    "hate", "bad", "terrible", "awful", "worst", "boring", "trash", "garbage", "stupid", "idiot",
    "lag", "laggy", "cringe", "sucks", "annoying", "ugly", "sad", "dead", "mid", "scam", "toxic",
    "loser", "worse", "fail", "unwatchable", "pathetic",
];

const NEGATORS: &[&str] = &["not", "no", "never", "dont", "don't", "isnt", "isn't"];

impl HeuristicClassifier {
    pub fn new() -> Result<Self> {
        // First match wins, so the order encodes precedence.
        let rules: [(Tone, &str, f64); 8] = [
            (
                Tone::Spam,
                r"(?i)(\bfree\s+(followers|viewers|subs|subscribers|views)\b|\bbuy\s+(followers|viewers)\b|\b[a-z0-9-]+\.(com|net|ru|xyz|top|biz|info)\b|bit\.ly/)",
                0.8,
            ),
            (
                Tone::Toxic,
                r"(?i)\b(kys|idiot|moron|stfu|shut\s+up|loser|trash\s+streamer|garbage|pathetic|nobody\s+cares|uninstall)\b",
                0.75,
            ),
            (
                Tone::Critical,
                r"(?i)\b(boring|lag+y?|laggy|bad|worse|worst|mid|cringe|unwatchable|can'?t\s+hear|too\s+(loud|quiet)|audio\s+(is\s+)?(bad|off|broken)|sucks)\b",
                0.65,
            ),
            (
                Tone::Constructive,
                r"(?i)(\bsuggest(ion)?\b|\bmaybe\s+(you|try|turn)\b|\bcould\s+you\b|\bwould\s+be\s+(nice|better|cool)\b|\bidea\b|\bfeedback\b|\b(pls|please)\s+(fix|turn|add|try)\b)",
                0.6,
            ),
            (
                Tone::Question,
                r"(?i)(\?\s*$|^(who|what|when|where|why|how|is|are|can|do|does)\b)",
                0.55,
            ),
            (
                Tone::Hype,
                r"(?i)(\bpog(gers|champ)?\b|\bhype\b|\blet'?s\s+go+\b|\binsane\b|\bclutch\b|\bno\s+way\b|!{3,}|\bgo+a+l+\b)",
                0.65,
            ),
            (
                Tone::Humor,
                r"(?i)(\blo+l\b|\blmf?ao+\b|\b(ha){2,}h?\b|\brofl\b|\bkekw?\b|\bxd\b|\bomegalul\b|😂|🤣)",
                0.65,
            ),
            (
                Tone::Supportive,
                r"(?i)(\blove\s+(you|this|the\s+stream|it)\b|\bthanks?\b|\bthank\s+you\b|\bgg\b|<3|\byou\s+got\s+this\b|\bproud\b|\bwholesome\b|❤)",
                0.6,
            ),
        ];

        let mut patterns = Vec::with_capacity(rules.len());
        for (tone, pattern, confidence) in rules {
            patterns.push(TonePattern {
                tone,
                regex: Regex::new(pattern)?,
                confidence,
            });
        }

        Ok(Self {
            patterns,
            positive: POSITIVE_WORDS.iter().copied().collect(),
            negative: NEGATIVE_WORDS.iter().copied().collect(),
        })
    }

    pub fn infer(&self, text: &str) -> ToneVerdict {
        let text = text.trim();
        for pattern in &self.patterns {
            if pattern.regex.is_match(text) {
                return ToneVerdict {
                    tone: pattern.tone,
                    confidence: pattern.confidence,
                    rationale: Some(format!("matched {} keywords", pattern.tone)),
                };
            }
        }
        ToneVerdict {
            tone: Tone::Neutral,
            confidence: 0.35,
            rationale: None,
        }
    }

    /// Lexicon sentiment in [-1, 1]; a negator flips the next scored word.
    pub fn sentiment(&self, text: &str) -> f64 {
        let mut raw = 0.0;
        let mut negate = false;
        for word in text.split_whitespace() {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .to_lowercase();
            if word.is_empty() {
                continue;
            }
            if NEGATORS.contains(&word.as_str()) {
                negate = true;
                continue;
            }
            let score = if self.positive.contains(word.as_str()) {
                1.0
            } else if self.negative.contains(word.as_str()) {
                -1.0
            } else {
                continue;
            };
            raw += if negate { -score } else { score };
            negate = false;
        }
        (raw * 0.5_f64).tanh()
    }
}

#[async_trait]
impl ToneClassifier for HeuristicClassifier {
    fn name(&self) -> &str { "heuristic" }

    async fn classify(&self, text: &str, _ctx: &ClassifyContext) -> Result<ToneVerdict, ClassifyError> {
        Ok(self.infer(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> HeuristicClassifier {
        HeuristicClassifier::new().unwrap()
    }

    #[test]
    fn detects_link_spam() {
        let c = classifier();
        assert_eq!(c.infer("free followers at bestsite.com").tone, Tone::Spam);
        assert_eq!(c.infer("check bit.ly/abc").tone, Tone::Spam);
    }

    #[test]
    fn precedence_prefers_toxic_over_hype() {
        let c = classifier();
        assert_eq!(c.infer("shut up idiot LETS GOOO").tone, Tone::Toxic);
    }

    #[test]
    fn recognises_positive_families() {
        let c = classifier();
        assert_eq!(c.infer("LETS GOOO").tone, Tone::Hype);
        assert_eq!(c.infer("lmao that fall").tone, Tone::Humor);
        assert_eq!(c.infer("love the stream <3").tone, Tone::Supportive);
        assert_eq!(c.infer("maybe try the left path").tone, Tone::Constructive);
        assert_eq!(c.infer("this is so boring").tone, Tone::Critical);
        assert_eq!(c.infer("what game is this?").tone, Tone::Question);
        assert_eq!(c.infer("ok").tone, Tone::Neutral);
    }

    #[test]
    fn sentiment_is_bounded_and_signed() {
        let c = classifier();
        assert!(c.sentiment("great stream love it") > 0.5);
        assert!(c.sentiment("boring trash") < -0.5);
        assert!(c.sentiment("not good") < 0.0);
        assert_eq!(c.sentiment("hello there"), 0.0);
        let s = c.sentiment("love love love love love love love love");
        assert!(s <= 1.0);
    }
}
