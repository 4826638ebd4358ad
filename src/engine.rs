//! Top-level facade wiring the store, classifier, tool registry, and executor
//! into a single `run(request)` entry point, grounded in the single
//! `build_graph()` entry point of the pipeline this engine replaces.

use std::sync::Arc;

use crate::classifier::{ScopeCache, ScopeClassifier};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::executor::{Briefing, Executor};
use crate::llm::{AnthropicClient, ClientConfig, LLMClient, OpenAIClient};
use crate::metrics::{MetricsSink, RunMetricsBuilder, TracingMetricsSink};
use crate::model::LlmStageDefaults;
use crate::store::StrategyStore;
use crate::tools::llm_analyzer::LlmAnalyzerAdapter;
use crate::tools::neural_search::NeuralSearchAdapter;
use crate::tools::web_search::WebSearchAdapter;
use crate::tools::ToolRegistry;

/// Picks a provider client for a stage's configured model name. The strategy
/// store only ever names a model id ("claude-..." or "gpt-..."), never a
/// provider, so dispatch is by prefix rather than an explicit field.
fn client_for_stage(defaults: &LlmStageDefaults, config: &EngineConfig) -> Arc<dyn LLMClient> {
    if defaults.model.starts_with("claude") {
        Arc::new(AnthropicClient::new(
            ClientConfig::new(config.anthropic_api_key.clone()).with_timeout(config.request_timeout.as_secs()),
        ))
    } else {
        Arc::new(OpenAIClient::new(
            ClientConfig::new(config.openai_api_key.clone()).with_timeout(config.request_timeout.as_secs()),
        ))
    }
}

pub struct Engine {
    store: Arc<StrategyStore>,
    classifier_client: Arc<dyn LLMClient>,
    executor: Executor,
    scope_cache: ScopeCache,
    sink: Arc<dyn MetricsSink>,
    request_timeout: std::time::Duration,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("request_timeout", &self.request_timeout).finish_non_exhaustive()
    }
}

impl Engine {
    /// Build the engine from configuration and an already-populated store.
    /// Strategy loading (reading documents off disk/DB into the store) is the
    /// caller's responsibility via [`crate::store::StrategyStoreBuilder`],
    /// keeping this constructor free of I/O beyond client construction.
    pub fn from_config(config: EngineConfig, store: StrategyStore) -> Result<Self> {
        let store = Arc::new(store);
        store.global_settings().validate()?;

        let classifier_defaults = store
            .global_settings()
            .llm_defaults
            .get("scope_classifier")
            .cloned()
            .ok_or_else(|| Error::Config("missing llm_defaults entry for stage 'scope_classifier'".to_string()))?;
        let analyzer_defaults = store
            .global_settings()
            .llm_defaults
            .get("analyzer")
            .cloned()
            .ok_or_else(|| Error::Config("missing llm_defaults entry for stage 'analyzer'".to_string()))?;
        let fill_defaults = store
            .global_settings()
            .llm_defaults
            .get("fill")
            .cloned()
            .ok_or_else(|| Error::Config("missing llm_defaults entry for stage 'fill'".to_string()))?;

        let classifier_client = client_for_stage(&classifier_defaults, &config);
        let fill_client = client_for_stage(&fill_defaults, &config);
        let analyzer_client = client_for_stage(&analyzer_defaults, &config);

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(WebSearchAdapter::new(config.sonar_api_key)))?;
        registry.register(Arc::new(NeuralSearchAdapter::new(config.exa_api_key)))?;
        registry.register(Arc::new(LlmAnalyzerAdapter::new(analyzer_client, analyzer_defaults)))?;
        let registry = Arc::new(registry);

        let executor = Executor::new(registry, fill_client, fill_defaults, config.fan_out_limit);

        Ok(Self {
            store,
            classifier_client,
            executor,
            scope_cache: ScopeCache::new(),
            sink: Arc::new(TracingMetricsSink),
            request_timeout: config.request_timeout,
        })
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Classify `request`, select and run the matching strategy, and return
    /// the quality-checked briefing.
    pub async fn run(&self, request: &str) -> Result<Briefing> {
        let mut metrics = RunMetricsBuilder::new();
        metrics.start_phase("scope");

        let scope_defaults = self
            .store
            .global_settings()
            .llm_defaults
            .get("scope_classifier")
            .ok_or_else(|| Error::Config("missing llm_defaults entry for stage 'scope_classifier'".to_string()))?;

        let classifier = ScopeClassifier::new(self.classifier_client.as_ref(), scope_defaults).with_cache(&self.scope_cache);
        let classification = classifier.classify(request, &self.store).await?;

        let index_entry = self
            .store
            .select_strategy(&classification.category, classification.time_window, classification.depth)
            .ok_or_else(|| Error::UnscopedRequest(request.to_string()))?;
        let slug = index_entry.slug.clone();
        let fan_out = index_entry.fan_out.clone();
        metrics.set_strategy_slug(slug.clone());

        let strategy = self.store.get_strategy(&slug)?;
        let tasks = classification.tasks.clone();

        let mut vars: std::collections::HashMap<String, serde_json::Value> = classification
            .variables
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        vars.entry("request".to_string()).or_insert_with(|| serde_json::Value::String(request.to_string()));

        let today = chrono::Utc::now().date_naive();
        let deadline = Some(std::time::Instant::now() + self.request_timeout);
        let briefing = self
            .executor
            .run(strategy, &slug, vars, &fan_out, &tasks, today, deadline, &mut metrics)
            .await?;

        let finished = metrics.build();
        self.sink.emit(&finished);
        Ok(briefing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Provider;
    use crate::store::StrategyStoreBuilder;
    use std::path::PathBuf;
    use std::time::Duration;

    fn test_config() -> EngineConfig {
        EngineConfig {
            db_path: PathBuf::from(":memory:"),
            anthropic_api_key: "anthropic-key".to_string(),
            openai_api_key: "openai-key".to_string(),
            sonar_api_key: "sonar-key".to_string(),
            exa_api_key: "exa-key".to_string(),
            fan_out_limit: 4,
            request_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn client_for_stage_picks_anthropic_for_claude_models() {
        let defaults = LlmStageDefaults { model: "claude-3-5-sonnet-20241022".to_string(), temperature: None, max_tokens: None };
        let client = client_for_stage(&defaults, &test_config());
        assert_eq!(client.provider(), Provider::Anthropic);
    }

    #[test]
    fn client_for_stage_picks_openai_for_gpt_models() {
        let defaults = LlmStageDefaults { model: "gpt-4o-mini".to_string(), temperature: None, max_tokens: None };
        let client = client_for_stage(&defaults, &test_config());
        assert_eq!(client.provider(), Provider::OpenAI);
    }

    // Full `Engine::run()` integration is not exercised here: `from_config`
    // wires the real Sonar/Exa/Anthropic adapters, which would hit the
    // network. Classify-and-select and step-execution behavior are instead
    // covered directly against `ScopeClassifier` and `Executor` in
    // classifier.rs and executor.rs, with stub adapters and clients.
    #[test]
    fn from_config_reports_missing_llm_defaults_stage() {
        // No global settings admitted: the store falls back to
        // `GlobalSettings::default()`, which is missing every required stage.
        let builder = StrategyStoreBuilder::open_in_memory().unwrap();
        let store = builder.build().unwrap();

        let err = Engine::from_config(test_config(), store).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
