//! HTTP-backed explainer.
//!
//! Posts a compact metadata summary of a connection and its rule-based
//! verdict to a configurable endpoint and expects a short natural-language
//! elaboration back. Strictly best-effort: the poller owns the deadline,
//! and this client additionally carries its own request timeout so a hung
//! backend cannot pin a task. No payload content ever leaves the host,
//! only connection metadata.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use sockeye_core::config::ExplainerConfig;
use sockeye_core::heuristics::explainer::{ExplainError, Explainer};
use sockeye_core::heuristics::Verdict;
use sockeye_core::ConnectionRecord;

/// Request body sent to the explainer endpoint.
#[derive(Debug, Serialize)]
struct ExplainRequest<'a> {
    protocol: String,
    local: String,
    remote: String,
    state: String,
    process: Option<&'a str>,
    category: String,
    score: u8,
    rationale: &'a str,
}

/// Response body expected from the explainer endpoint.
#[derive(Debug, Deserialize)]
struct ExplainResponse {
    explanation: String,
}

/// Explainer client for an HTTP inference backend.
pub struct HttpExplainer {
    endpoint: String,
    client: Client,
}

impl HttpExplainer {
    /// Build a client for the configured endpoint.
    ///
    /// The HTTP timeout is set a little above the poller's deadline; the
    /// poller still cuts the call off first.
    pub fn new(config: &ExplainerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.saturating_mul(2).max(1000)))
            .build()
            .context("building explainer HTTP client")?;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            client,
        })
    }

    fn build_request<'a>(record: &'a ConnectionRecord, base: &'a Verdict) -> ExplainRequest<'a> {
        ExplainRequest {
            protocol: record.key.protocol.to_string(),
            local: record.key.local.to_string(),
            remote: record.key.remote.to_string(),
            state: record.state.to_string(),
            process: record.process.name(),
            category: base.category.to_string(),
            score: base.score,
            rationale: &base.rationale,
        }
    }
}

impl Explainer for HttpExplainer {
    fn explain<'a>(
        &'a self,
        record: &'a ConnectionRecord,
        base: &'a Verdict,
    ) -> Pin<Box<dyn Future<Output = Result<String, ExplainError>> + Send + 'a>> {
        Box::pin(async move {
            let body = Self::build_request(record, base);
            let response = self
                .client
                .post(&self.endpoint)
                .json(&body)
                .send()
                .await
                .map_err(|e| ExplainError::Unavailable(e.to_string()))?
                .error_for_status()
                .map_err(|e| ExplainError::Unavailable(e.to_string()))?;

            let parsed: ExplainResponse = response
                .json()
                .await
                .map_err(|_| ExplainError::InvalidResponse)?;

            let text = parsed.explanation.trim().to_string();
            if text.is_empty() {
                return Err(ExplainError::InvalidResponse);
            }
            Ok(text)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sockeye_core::heuristics::VerdictCategory;
    use sockeye_core::{ConnState, ConnectionId, ConnectionKey, CorrelationGap, ProcessLink, Protocol};

    #[test]
    fn request_body_carries_metadata_only() {
        let now = Utc::now();
        let record = ConnectionRecord {
            id: ConnectionId(3),
            key: ConnectionKey::new(
                Protocol::Tcp,
                "10.0.0.5:51000".parse().unwrap(),
                "203.0.113.9:445".parse().unwrap(),
            ),
            state: ConnState::Established,
            pid: Some(10),
            process: ProcessLink::Gap(CorrelationGap::ProcessExited),
            first_seen: now,
            last_seen: now,
            verdict: None,
        };
        let base = Verdict::new(VerdictCategory::WellKnownService, 70, "using SMB on port 445".into());

        let body = HttpExplainer::build_request(&record, &base);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["protocol"], "tcp");
        assert_eq!(json["remote"], "203.0.113.9:445");
        assert_eq!(json["state"], "ESTABLISHED");
        assert_eq!(json["process"], serde_json::Value::Null);
        assert_eq!(json["score"], 70);
    }

    #[test]
    fn response_parsing() {
        let parsed: ExplainResponse =
            serde_json::from_str(r#"{"explanation": "outbound SMB to a public host"}"#).unwrap();
        assert_eq!(parsed.explanation, "outbound SMB to a public host");
    }
}
