//! LLM analyzer adapter: wraps a completion as a single synthetic evidence item.
//!
//! Its output is never a citable source — callers must treat the result the
//! same way [`crate::evidence::Evidence::is_synthetic`] flags it, excluding
//! it from citation numbering while still folding its text into a section.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::evidence::Evidence;
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};
use crate::model::LlmStageDefaults;

use super::{AdapterOutput, Capability, ToolAdapter};

const SYSTEM_PROMPT: &str = "You are a research analyst. Synthesize the provided evidence into \
a concise, well-supported briefing paragraph. Do not invent facts not present in the input.";

pub struct LlmAnalyzerAdapter {
    client: Arc<dyn LLMClient>,
    defaults: LlmStageDefaults,
}

impl LlmAnalyzerAdapter {
    pub fn new(client: Arc<dyn LLMClient>, defaults: LlmStageDefaults) -> Self {
        Self { client, defaults }
    }
}

#[async_trait]
impl ToolAdapter for LlmAnalyzerAdapter {
    fn name(&self) -> &str {
        "llm_analyzer"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Call]
    }

    async fn dispatch(&self, _capability: Capability, inputs: &HashMap<String, Value>) -> Result<AdapterOutput> {
        let prompt = inputs
            .get("prompt")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::adapter_permanent("llm_analyzer", "missing required input 'prompt'"))?;

        // gpt-5-mini rejects non-default sampling temperature; every other
        // configured model accepts the stage's configured temperature.
        let temperature = if self.defaults.model.contains("gpt-5-mini") {
            None
        } else {
            self.defaults.temperature.or(Some(0.3))
        };

        let mut request = CompletionRequest::new()
            .with_model(self.defaults.model.clone())
            .with_system(SYSTEM_PROMPT)
            .with_message(ChatMessage::user(prompt))
            .with_max_tokens(self.defaults.max_tokens.unwrap_or(1024));
        if let Some(t) = temperature {
            request = request.with_temperature(t);
        }

        let response = self.client.complete(request).await?;

        let mut evidence = Evidence::new(Evidence::SYNTHETIC_URL, "llm_analyzer");
        evidence.title = Some("Synthesized Briefing".to_string());
        evidence.snippet = Some(response.content);
        Ok(AdapterOutput::Evidence(vec![evidence]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionResponse, Provider, TokenUsage};
    use async_trait::async_trait;
    use chrono::Utc;

    struct StubClient;

    #[async_trait]
    impl LLMClient for StubClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
            Ok(CompletionResponse {
                id: "test".into(),
                model: "stub".into(),
                content: "synthesized text".into(),
                stop_reason: None,
                usage: TokenUsage::default(),
                timestamp: Utc::now(),
                cost: None,
            })
        }

        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        fn available_models(&self) -> Vec<crate::llm::ModelSpec> {
            vec![]
        }
    }

    fn defaults(model: &str) -> LlmStageDefaults {
        LlmStageDefaults {
            model: model.to_string(),
            temperature: Some(0.3),
            max_tokens: Some(512),
        }
    }

    #[tokio::test]
    async fn wraps_completion_as_single_synthetic_evidence() {
        let adapter = LlmAnalyzerAdapter::new(Arc::new(StubClient), defaults("claude-3-5-sonnet"));
        let mut inputs = HashMap::new();
        inputs.insert("prompt".to_string(), Value::String("summarize this".into()));

        let output = adapter.dispatch(Capability::Call, &inputs).await.unwrap();
        match output {
            AdapterOutput::Evidence(ev) => {
                assert_eq!(ev.len(), 1);
                assert!(ev[0].is_synthetic());
                assert_eq!(ev[0].snippet.as_deref(), Some("synthesized text"));
            }
            _ => panic!("expected evidence output"),
        }
    }

    #[tokio::test]
    async fn missing_prompt_is_permanent_error() {
        let adapter = LlmAnalyzerAdapter::new(Arc::new(StubClient), defaults("claude-3-5-sonnet"));
        let err = adapter.dispatch(Capability::Call, &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::AdapterPermanent { .. }));
    }
}
