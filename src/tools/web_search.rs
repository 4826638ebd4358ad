//! Sonar-backed web search adapter.
//!
//! Sonar exposes an OpenAI-compatible chat-completions endpoint with extra,
//! non-standard parameters (`search_mode`, `search_domain_filter`,
//! `search_recency_filter`, ...) carried in the request body rather than
//! `extra_body` as the Python client does it — this adapter builds the
//! request directly instead of going through [`crate::llm::OpenAIClient`],
//! which models only the standard OpenAI wire shape.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::evidence::Evidence;

use super::{AdapterOutput, Capability, ToolAdapter};

const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";

/// Parameter names forwarded verbatim into the request body alongside the
/// standard `model`/`messages`, mirroring the Python adapter's bucket split
/// between OpenAI-standard params and Perplexity-specific search params.
const SEARCH_PARAM_NAMES: &[&str] = &[
    "search_mode",
    "search_domain_filter",
    "search_recency_filter",
    "return_citations",
    "return_related_questions",
];

pub struct WebSearchAdapter {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl WebSearchAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "sonar".to_string(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("failed to construct HTTP client"),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct SonarMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct SonarResponse {
    choices: Vec<SonarChoice>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SonarChoice {
    message: SonarMessageOut,
}

#[derive(Debug, Deserialize)]
struct SonarMessageOut {
    content: String,
}

#[async_trait]
impl ToolAdapter for WebSearchAdapter {
    fn name(&self) -> &str {
        "sonar"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Call]
    }

    async fn dispatch(&self, _capability: Capability, inputs: &HashMap<String, Value>) -> Result<AdapterOutput> {
        let query = inputs
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::adapter_permanent("sonar", "missing required input 'query'"))?;

        let mut body = serde_json::Map::new();
        body.insert("model".to_string(), Value::String(self.model.clone()));
        body.insert(
            "messages".to_string(),
            serde_json::to_value(vec![SonarMessage {
                role: "user",
                content: query.to_string(),
            }])
            .unwrap(),
        );
        if let Some(max_tokens) = inputs.get("max_tokens") {
            body.insert("max_tokens".to_string(), max_tokens.clone());
        }
        for name in SEARCH_PARAM_NAMES {
            if let Some(value) = inputs.get(*name) {
                body.insert((*name).to_string(), value.clone());
            }
        }

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::adapter_transient("sonar", e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::adapter_transient("sonar", e.to_string()))?;
        if !status.is_success() {
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                Error::adapter_transient("sonar", text)
            } else {
                Error::adapter_permanent("sonar", text)
            });
        }

        let parsed: SonarResponse =
            serde_json::from_str(&text).map_err(|e| Error::adapter_permanent("sonar", e.to_string()))?;
        let answer = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        if parsed.citations.is_empty() {
            let mut evidence = Evidence::new(Evidence::SYNTHETIC_URL, "sonar");
            evidence.snippet = Some(answer);
            return Ok(AdapterOutput::Evidence(vec![evidence]));
        }

        let evidence = parsed
            .citations
            .into_iter()
            .map(|url| {
                let mut e = Evidence::new(url, "sonar");
                e.snippet = Some(answer.clone());
                e
            })
            .collect();
        Ok(AdapterOutput::Evidence(evidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_base_url_and_model() {
        let adapter = WebSearchAdapter::new("key")
            .with_base_url("http://localhost:9999")
            .with_model("sonar-pro");
        assert_eq!(adapter.base_url, "http://localhost:9999");
        assert_eq!(adapter.model, "sonar-pro");
    }

    #[tokio::test]
    async fn dispatch_fails_without_query() {
        let adapter = WebSearchAdapter::new("key");
        let err = adapter.dispatch(Capability::Call, &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::AdapterPermanent { .. }));
    }
}
