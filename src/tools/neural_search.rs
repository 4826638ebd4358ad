//! Exa-backed neural search adapter: `search`, `contents`, `find_similar`, `answer`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::evidence::Evidence;

use super::{AdapterOutput, Capability, ToolAdapter};

const DEFAULT_BASE_URL: &str = "https://api.exa.ai";

/// Friendly input name -> Exa API field name, mirroring the Python adapter's
/// `param_mappings` table. Anything not listed here is forwarded unchanged.
const PARAM_MAPPINGS: &[(&str, &str)] = &[
    ("query", "query"),
    ("top_k", "numResults"),
    ("max_results", "numResults"),
    ("start_published_date", "startPublishedDate"),
    ("end_published_date", "endPublishedDate"),
    ("include_domains", "includeDomains"),
    ("exclude_domains", "excludeDomains"),
];

fn map_params(inputs: &HashMap<String, Value>) -> serde_json::Map<String, Value> {
    let mut body = serde_json::Map::new();
    for (key, value) in inputs {
        let mapped = PARAM_MAPPINGS
            .iter()
            .find(|(from, _)| from == key)
            .map(|(_, to)| *to)
            .unwrap_or(key.as_str());
        body.insert(mapped.to_string(), value.clone());
    }
    body
}

pub struct NeuralSearchAdapter {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl NeuralSearchAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
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

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::adapter_transient("exa", e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::adapter_transient("exa", e.to_string()))?;
        if !status.is_success() {
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                Error::adapter_transient("exa", text)
            } else {
                Error::adapter_permanent("exa", text)
            });
        }
        serde_json::from_str(&text).map_err(|e| Error::adapter_permanent("exa", e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ExaResultsEnvelope {
    #[serde(default)]
    results: Vec<ExaResult>,
}

#[derive(Debug, Deserialize)]
struct ExaResult {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default, rename = "publishedDate")]
    published_date: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

impl ExaResult {
    fn into_evidence(self) -> Evidence {
        Evidence {
            url: self.url,
            publisher: self.author.or(self.source),
            title: self.title,
            date: self.published_date,
            snippet: self.text,
            tool: "exa".to_string(),
            score: self.score,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExaAnswerResponse {
    answer: String,
    #[serde(default)]
    citations: Vec<ExaResult>,
}

#[async_trait]
impl ToolAdapter for NeuralSearchAdapter {
    fn name(&self) -> &str {
        "exa"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Search, Capability::Contents, Capability::FindSimilar, Capability::Answer]
    }

    async fn dispatch(&self, capability: Capability, inputs: &HashMap<String, Value>) -> Result<AdapterOutput> {
        let body = Value::Object(map_params(inputs));

        match capability {
            Capability::Search => {
                let response = self.post("/search", body).await?;
                let envelope: ExaResultsEnvelope =
                    serde_json::from_value(response).map_err(|e| Error::adapter_permanent("exa", e.to_string()))?;
                Ok(AdapterOutput::Evidence(
                    envelope.results.into_iter().map(ExaResult::into_evidence).collect(),
                ))
            }
            Capability::Contents => {
                let response = self.post("/contents", body).await?;
                let envelope: ExaResultsEnvelope =
                    serde_json::from_value(response).map_err(|e| Error::adapter_permanent("exa", e.to_string()))?;
                Ok(AdapterOutput::Evidence(
                    envelope.results.into_iter().map(ExaResult::into_evidence).collect(),
                ))
            }
            Capability::FindSimilar => {
                let response = self.post("/findSimilar", body).await?;
                let envelope: ExaResultsEnvelope =
                    serde_json::from_value(response).map_err(|e| Error::adapter_permanent("exa", e.to_string()))?;
                Ok(AdapterOutput::Evidence(
                    envelope.results.into_iter().map(ExaResult::into_evidence).collect(),
                ))
            }
            Capability::Answer => {
                let response = self.post("/answer", body).await?;
                let parsed: ExaAnswerResponse =
                    serde_json::from_value(response).map_err(|e| Error::adapter_permanent("exa", e.to_string()))?;
                if parsed.citations.is_empty() {
                    return Ok(AdapterOutput::Text(parsed.answer));
                }
                let evidence = parsed
                    .citations
                    .into_iter()
                    .map(|c| {
                        let mut e = c.into_evidence();
                        e.snippet.get_or_insert_with(|| parsed.answer.clone());
                        e
                    })
                    .collect();
                Ok(AdapterOutput::Evidence(evidence))
            }
            Capability::Call => Err(Error::unknown_capability("exa", "call")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_friendly_param_names() {
        let mut inputs = HashMap::new();
        inputs.insert("query".to_string(), Value::String("AI labs".into()));
        inputs.insert("top_k".to_string(), Value::from(5));
        let mapped = map_params(&inputs);
        assert_eq!(mapped.get("numResults"), Some(&Value::from(5)));
        assert_eq!(mapped.get("query"), Some(&Value::String("AI labs".into())));
    }

    #[test]
    fn unmapped_params_pass_through() {
        let mut inputs = HashMap::new();
        inputs.insert("category".to_string(), Value::String("company".into()));
        let mapped = map_params(&inputs);
        assert_eq!(mapped.get("category"), Some(&Value::String("company".into())));
    }

    #[test]
    fn exa_result_prefers_author_over_source_for_publisher() {
        let result = ExaResult {
            url: "http://a.com".into(),
            title: None,
            author: Some("Jane Doe".into()),
            source: Some("Example News".into()),
            published_date: None,
            text: None,
            score: None,
        };
        let evidence = result.into_evidence();
        assert_eq!(evidence.publisher.as_deref(), Some("Jane Doe"));
    }
}
