//! Scope classification: turns a free-text request into a strategy selection.
//!
//! Classification is LLM-driven with no heuristic fallback — if the model
//! call fails or its response can't be parsed after one retry, classification
//! fails with [`Error::LlmClassificationFailed`] rather than guessing from
//! keywords. Optional memoization avoids re-issuing an identical completion
//! for a request already seen this process's lifetime.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};
use crate::model::{Depth, LlmStageDefaults, TimeWindow};
use crate::store::StrategyStore;

/// Structured result of classification: the fields needed to select a
/// strategy from the index, plus any variables the model extracted that the
/// chosen strategy's `required_variables` ask for, plus the deterministic
/// subtask split driving strategy-level `fan_out="task"` research passes.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeClassification {
    pub category: String,
    pub time_window: TimeWindow,
    pub depth: Depth,
    pub variables: HashMap<String, String>,
    pub tasks: Vec<String>,
}

/// Maximum number of subtasks `split_tasks` will produce for a single request.
const MAX_TASKS: usize = 5;

/// Deterministically split a request into subtasks on common separators
/// (commas, "and"/"&", semicolons, slashes). Independent of the LLM call so
/// that strategy-level `fan_out="task"` fan-out is reproducible across
/// identical requests.
fn split_tasks(request: &str, max_tasks: usize) -> Vec<String> {
    static SEPARATOR: std::sync::LazyLock<regex::Regex> =
        std::sync::LazyLock::new(|| regex::Regex::new(r",| and | & |;|\+|/|\|").unwrap());

    let mut tasks: Vec<String> = Vec::new();
    for part in SEPARATOR.split(request) {
        let cleaned = part.trim();
        if !cleaned.is_empty() && !tasks.iter().any(|t| t == cleaned) {
            tasks.push(cleaned.to_string());
        }
        if tasks.len() >= max_tasks {
            break;
        }
    }
    if tasks.is_empty() {
        tasks.push(request.trim().to_string());
    }
    tasks
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    category: String,
    time_window: TimeWindow,
    depth: Depth,
    #[serde(default)]
    variables: HashMap<String, String>,
}

/// In-memory memoization of classification results, keyed by a content hash
/// of the request text. Grounded in the same `CacheKey` idiom the LLM client
/// module uses for prompt-cache bookkeeping.
#[derive(Default)]
pub struct ScopeCache {
    entries: Mutex<HashMap<crate::llm::CacheKey, ScopeClassification>>,
}

impl ScopeCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &crate::llm::CacheKey) -> Option<ScopeClassification> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn insert(&self, key: crate::llm::CacheKey, value: ScopeClassification) {
        self.entries.lock().unwrap().insert(key, value);
    }
}

const SYSTEM_PROMPT: &str = "You classify a research request into a category, time window, \
and depth, and extract any named variables (companies, topics, regions) the request mentions. \
Respond with a single JSON object: {\"category\": string, \"time_window\": \"day\"|\"week\"|\"month\"|\"year\", \
\"depth\": \"brief\"|\"overview\"|\"deep\"|\"comprehensive\", \"variables\": {string: string}}. \
Respond with JSON only, no surrounding prose.";

pub struct ScopeClassifier<'a> {
    client: &'a dyn LLMClient,
    defaults: &'a LlmStageDefaults,
    cache: Option<&'a ScopeCache>,
}

impl<'a> ScopeClassifier<'a> {
    pub fn new(client: &'a dyn LLMClient, defaults: &'a LlmStageDefaults) -> Self {
        Self {
            client,
            defaults,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: &'a ScopeCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Classify `request`, then validate the result against the strategy
    /// index so a hallucinated category/time_window/depth combination with no
    /// matching strategy fails as [`Error::UnscopedRequest`] rather than
    /// silently falling through to the executor.
    pub async fn classify(&self, request: &str, store: &StrategyStore) -> Result<ScopeClassification> {
        let cache_key = crate::llm::CacheKey::from_content(request);
        if let Some(cache) = self.cache {
            if let Some(hit) = cache.get(&cache_key) {
                return Ok(hit);
            }
        }

        let classification = self.classify_with_retry(request).await?;

        if store
            .select_strategy(&classification.category, classification.time_window, classification.depth)
            .is_none()
        {
            return Err(Error::UnscopedRequest(format!(
                "no strategy matches category={} time_window={:?} depth={:?}",
                classification.category, classification.time_window, classification.depth
            )));
        }

        if let Some(cache) = self.cache {
            cache.insert(cache_key, classification.clone());
        }
        Ok(classification)
    }

    async fn classify_with_retry(&self, request: &str) -> Result<ScopeClassification> {
        match self.call_and_parse(request).await {
            Ok(c) => Ok(c),
            Err(_) => self.call_and_parse(request).await.map_err(|e| {
                Error::LlmClassificationFailed(format!("failed after one retry: {e}"))
            }),
        }
    }

    async fn call_and_parse(&self, request: &str) -> Result<ScopeClassification> {
        let completion = CompletionRequest::new()
            .with_model(self.defaults.model.clone())
            .with_system(SYSTEM_PROMPT)
            .with_message(ChatMessage::user(request))
            .with_temperature(self.defaults.temperature.unwrap_or(0.0))
            .with_max_tokens(self.defaults.max_tokens.unwrap_or(512));

        let response = self.client.complete(completion).await?;
        let raw: RawClassification = serde_json::from_str(response.content.trim())
            .map_err(|e| Error::LlmClassificationFailed(e.to_string()))?;

        Ok(ScopeClassification {
            category: raw.category,
            time_window: raw.time_window,
            depth: raw.depth,
            variables: raw.variables,
            tasks: split_tasks(request, MAX_TASKS),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionResponse, Provider, TokenUsage};
    use crate::store::StrategyStoreBuilder;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubClient {
        response: String,
        call_count: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl LLMClient for StubClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
            let call = self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && call == 0 {
                return Err(Error::adapter_transient("stub", "simulated failure"));
            }
            Ok(CompletionResponse {
                id: "test".into(),
                model: "stub".into(),
                content: self.response.clone(),
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

    fn defaults() -> LlmStageDefaults {
        LlmStageDefaults {
            model: "stub".into(),
            temperature: Some(0.0),
            max_tokens: Some(256),
        }
    }

    fn store_with_news_brief() -> StrategyStore {
        let mut builder = StrategyStoreBuilder::open_in_memory().unwrap();
        let document = json!({
            "meta": { "slug": "news-brief", "version": 1, "category": "news", "time_window": "week", "depth": "brief" },
            "tool_chain": [{ "use": "sonar", "inputs": {} }],
        });
        let index = json!({
            "slug": "news-brief", "category": "news", "time_window": "week", "depth": "brief",
        });
        builder.admit_strategy(document, index).unwrap();
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn classifies_and_validates_against_index() {
        let client = StubClient {
            response: json!({"category": "news", "time_window": "week", "depth": "brief", "variables": {"topic": "AI labs"}}).to_string(),
            call_count: AtomicUsize::new(0),
            fail_first: false,
        };
        let defaults = defaults();
        let classifier = ScopeClassifier::new(&client, &defaults);
        let store = store_with_news_brief();

        let result = classifier.classify("What happened in AI labs this week?", &store).await.unwrap();
        assert_eq!(result.category, "news");
        assert_eq!(result.variables.get("topic"), Some(&"AI labs".to_string()));
    }

    #[tokio::test]
    async fn retries_once_on_transient_failure() {
        let client = StubClient {
            response: json!({"category": "news", "time_window": "week", "depth": "brief", "variables": {}}).to_string(),
            call_count: AtomicUsize::new(0),
            fail_first: true,
        };
        let defaults = defaults();
        let classifier = ScopeClassifier::new(&client, &defaults);
        let store = store_with_news_brief();

        let result = classifier.classify("news this week", &store).await.unwrap();
        assert_eq!(result.category, "news");
        assert_eq!(client.call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unscoped_when_no_strategy_matches() {
        let client = StubClient {
            response: json!({"category": "sports", "time_window": "day", "depth": "brief", "variables": {}}).to_string(),
            call_count: AtomicUsize::new(0),
            fail_first: false,
        };
        let defaults = defaults();
        let classifier = ScopeClassifier::new(&client, &defaults);
        let store = store_with_news_brief();

        let err = classifier.classify("who won the game", &store).await.unwrap_err();
        assert!(matches!(err, Error::UnscopedRequest(_)));
    }

    #[test]
    fn split_tasks_splits_on_separators_and_dedupes() {
        let tasks = split_tasks("OpenAI and Anthropic, OpenAI; Mistral", 5);
        assert_eq!(tasks, vec!["OpenAI", "Anthropic", "Mistral"]);
    }

    #[test]
    fn split_tasks_caps_at_max_tasks() {
        let tasks = split_tasks("a, b, c, d, e, f, g", 5);
        assert_eq!(tasks.len(), 5);
    }

    #[test]
    fn split_tasks_falls_back_to_whole_request_when_empty() {
        let tasks = split_tasks("   ", 5);
        assert_eq!(tasks, vec![""]);
    }

    #[tokio::test]
    async fn classification_includes_deterministic_tasks() {
        let client = StubClient {
            response: json!({"category": "news", "time_window": "week", "depth": "brief", "variables": {}}).to_string(),
            call_count: AtomicUsize::new(0),
            fail_first: false,
        };
        let defaults = defaults();
        let classifier = ScopeClassifier::new(&client, &defaults);
        let store = store_with_news_brief();

        let result = classifier
            .classify("OpenAI funding and Anthropic funding this week", &store)
            .await
            .unwrap();
        assert_eq!(result.tasks, vec!["OpenAI funding", "Anthropic funding this week"]);
    }

    #[tokio::test]
    async fn cache_avoids_second_llm_call() {
        let client = StubClient {
            response: json!({"category": "news", "time_window": "week", "depth": "brief", "variables": {}}).to_string(),
            call_count: AtomicUsize::new(0),
            fail_first: false,
        };
        let defaults = defaults();
        let cache = ScopeCache::new();
        let classifier = ScopeClassifier::new(&client, &defaults).with_cache(&cache);
        let store = store_with_news_brief();

        classifier.classify("news this week", &store).await.unwrap();
        classifier.classify("news this week", &store).await.unwrap();
        assert_eq!(client.call_count.load(Ordering::SeqCst), 1);
    }
}
