//! Typed boundary errors.
//!
//! Neither error ever escapes a channel worker: a `RecordError` drops the
//! single offending record, a `ClassifyError` sends classification down the
//! local heuristic path.

use thiserror::Error;

/// Reasons an inbound chat record is rejected before aggregation.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("undecodable event: {0}")]
    Decode(String),

    #[error("missing or empty field: {0}")]
    MissingField(&'static str),

    #[error("invalid timestamp: {0}")]
    Timestamp(String),

    #[error("unknown tone label: {0}")]
    UnknownTone(String),

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("emote span {start}..{end} outside message of {len} chars")]
    EmoteSpan { start: usize, end: usize, len: usize },

    #[error("record {id} is older than the retention horizon")]
    Stale { id: String },
}

/// Failures of the remote tone classifier.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classifier timed out after {0} ms")]
    Timeout(u64),

    #[error("classifier quota exhausted")]
    Quota,

    #[error("classifier returned HTTP {0}")]
    Http(u16),

    #[error("malformed classifier reply: {0}")]
    Malformed(String),

    #[error("classifier reply carried no tone label")]
    Unlabelled,

    #[error("classifier unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_display() {
        let error = RecordError::OutOfRange {
            field: "sentiment",
            value: 1.5,
        };
        assert_eq!(error.to_string(), "sentiment out of range: 1.5");
    }

    #[test]
    fn test_emote_span_display() {
        let error = RecordError::EmoteSpan {
            start: 4,
            end: 12,
            len: 8,
        };
        assert_eq!(error.to_string(), "emote span 4..12 outside message of 8 chars");
    }

    #[test]
    fn test_timeout_display() {
        assert_eq!(
            ClassifyError::Timeout(1500).to_string(),
            "classifier timed out after 1500 ms"
        );
    }

    #[test]
    fn test_errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RecordError>();
        assert_send_sync::<ClassifyError>();
    }
}
