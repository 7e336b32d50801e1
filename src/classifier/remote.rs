use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClassifyError;
use crate::types::Tone;
use super::{ClassifyContext, ToneClassifier, ToneVerdict};

/// HTTP tone classifier
pub struct RemoteClassifier {
    endpoint: String,
    api_key: String,
    timeout_ms: u64,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
    author: &'a str,
    recent_messages: &'a [String],
}

/// Replies are a tagged variant; anything else is rejected as malformed.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ClassifierReply {
    Verdict {
        tone: Tone,
        confidence: f64,
        #[serde(default)]
        rationale: Option<String>,
    },
    Summary {
        #[allow(dead_code)]
        text: String,
    },
}

impl RemoteClassifier {
    pub fn new(endpoint: &str, api_key: &str, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            timeout_ms,
            client,
        })
    }
}

fn parse_reply(body: &str) -> Result<ToneVerdict, ClassifyError> {
    let reply: ClassifierReply =
        serde_json::from_str(body).map_err(|e| ClassifyError::Malformed(e.to_string()))?;
    match reply {
        ClassifierReply::Verdict { tone, confidence, rationale } => {
            if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
                return Err(ClassifyError::Malformed(format!("confidence {} outside [0, 1]", confidence)));
            }
            Ok(ToneVerdict { tone, confidence, rationale })
        }
        ClassifierReply::Summary { .. } => Err(ClassifyError::Unlabelled),
    }
}

#[async_trait]
impl ToneClassifier for RemoteClassifier {
    fn name(&self) -> &str { "remote" }

    async fn classify(&self, text: &str, ctx: &ClassifyContext) -> Result<ToneVerdict, ClassifyError> {
        let payload = ClassifyRequest {
            text,
            author: &ctx.author,
            recent_messages: &ctx.recent_messages,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClassifyError::Timeout(self.timeout_ms)
                } else {
                    ClassifyError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ClassifyError::Quota);
        }
        if !status.is_success() {
            return Err(ClassifyError::Http(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ClassifyError::Unavailable(e.to_string()))?;
        parse_reply(&body)
    }
}
