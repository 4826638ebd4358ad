//! Run metrics: per-phase timing, per-adapter call counts, evidence-diversity
//! scoring, and a pluggable sink so the default `tracing`-backed emission can
//! be swapped in tests.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::evidence::{host_of, Evidence};

/// Where finished run metrics go. The engine never hard-codes `tracing`
/// calls directly in the executor — it always goes through a sink, so tests
/// can capture metrics without installing a subscriber.
pub trait MetricsSink: Send + Sync {
    fn emit(&self, metrics: &RunMetrics);
}

/// Emits each phase and adapter-call metric as a `tracing` event, the
/// engine's default sink outside of tests.
#[derive(Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn emit(&self, metrics: &RunMetrics) {
        tracing::info!(
            run_id = %metrics.run_id,
            strategy_slug = metrics.strategy_slug.as_deref().unwrap_or("unknown"),
            total_ms = metrics.total_duration().as_millis() as u64,
            api_calls = metrics.total_api_calls(),
            evidence_count = metrics.evidence_count,
            "research run completed"
        );
        for (phase, duration) in &metrics.phase_durations {
            tracing::debug!(phase = phase.as_str(), ms = duration.as_millis() as u64, "phase timing");
        }
        for (adapter, count) in &metrics.api_calls_by_adapter {
            tracing::debug!(adapter = adapter.as_str(), calls = count, "adapter call count");
        }
        tracing::debug!(
            unique_domains = metrics.unique_domains,
            unique_publishers = metrics.unique_publishers,
            source_diversity_score = metrics.source_diversity_score,
            "evidence diversity"
        );
    }
}

/// Accumulates timings and counters over the life of one engine run, then
/// finalizes into an immutable [`RunMetrics`] via [`RunMetricsBuilder::build`].
pub struct RunMetricsBuilder {
    run_id: uuid::Uuid,
    strategy_slug: Option<String>,
    started_at: Instant,
    phase_durations: HashMap<String, Duration>,
    phase_start: Option<(String, Instant)>,
    api_calls_by_adapter: HashMap<String, u64>,
    evidence_count: usize,
    llm_cost_usd: f64,
    unique_domains: usize,
    unique_publishers: usize,
    tools_used: usize,
    source_diversity_score: f64,
}

impl RunMetricsBuilder {
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4(),
            strategy_slug: None,
            started_at: Instant::now(),
            phase_durations: HashMap::new(),
            phase_start: None,
            api_calls_by_adapter: HashMap::new(),
            evidence_count: 0,
            llm_cost_usd: 0.0,
            unique_domains: 0,
            unique_publishers: 0,
            tools_used: 0,
            source_diversity_score: 0.0,
        }
    }

    pub fn set_strategy_slug(&mut self, slug: impl Into<String>) {
        self.strategy_slug = Some(slug.into());
    }

    /// Start timing `phase`, closing out whichever phase was previously open.
    pub fn start_phase(&mut self, phase: impl Into<String>) {
        self.end_phase();
        self.phase_start = Some((phase.into(), Instant::now()));
    }

    /// Close out the currently open phase, if any.
    pub fn end_phase(&mut self) {
        if let Some((phase, started)) = self.phase_start.take() {
            *self.phase_durations.entry(phase).or_default() += started.elapsed();
        }
    }

    pub fn record_api_call(&mut self, adapter: impl Into<String>) {
        *self.api_calls_by_adapter.entry(adapter.into()).or_default() += 1;
    }

    pub fn record_evidence(&mut self, count: usize) {
        self.evidence_count += count;
    }

    pub fn record_llm_cost(&mut self, cost: f64) {
        self.llm_cost_usd += cost;
    }

    /// Compute `source_diversity_score = 0.5*(unique_domains/valid_sources) +
    /// 0.5*min(unique_domains/10, 1)` over the final, deduped evidence set.
    /// `valid_sources` excludes the synthetic LLM-analyzer entry, since it has
    /// no domain of its own.
    pub fn record_diversity(&mut self, evidence: &[Evidence]) {
        let valid: Vec<&Evidence> = evidence.iter().filter(|e| !e.is_synthetic()).collect();

        let domains: HashSet<String> = valid.iter().filter_map(|e| host_of(&e.url)).collect();
        let publishers: HashSet<&str> = valid.iter().filter_map(|e| e.publisher.as_deref()).collect();
        let tools: HashSet<&str> = valid.iter().map(|e| e.tool.as_str()).collect();

        self.unique_domains = domains.len();
        self.unique_publishers = publishers.len();
        self.tools_used = tools.len();

        self.source_diversity_score = if valid.is_empty() {
            0.0
        } else {
            0.5 * (domains.len() as f64 / valid.len() as f64) + 0.5 * (domains.len() as f64 / 10.0).min(1.0)
        };
    }

    pub fn build(mut self) -> RunMetrics {
        self.end_phase();
        RunMetrics {
            run_id: self.run_id,
            strategy_slug: self.strategy_slug,
            total_duration: self.started_at.elapsed(),
            phase_durations: self.phase_durations,
            api_calls_by_adapter: self.api_calls_by_adapter,
            evidence_count: self.evidence_count,
            llm_cost_usd: self.llm_cost_usd,
            unique_domains: self.unique_domains,
            unique_publishers: self.unique_publishers,
            tools_used: self.tools_used,
            source_diversity_score: self.source_diversity_score,
        }
    }
}

impl Default for RunMetricsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Finalized metrics for one completed (or failed) engine run.
#[derive(Debug, Clone)]
pub struct RunMetrics {
    pub run_id: uuid::Uuid,
    pub strategy_slug: Option<String>,
    pub total_duration: Duration,
    pub phase_durations: HashMap<String, Duration>,
    pub api_calls_by_adapter: HashMap<String, u64>,
    pub evidence_count: usize,
    pub llm_cost_usd: f64,
    pub unique_domains: usize,
    pub unique_publishers: usize,
    pub tools_used: usize,
    pub source_diversity_score: f64,
}

impl RunMetrics {
    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    pub fn total_api_calls(&self) -> u64 {
        self.api_calls_by_adapter.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingSink {
        captured: Mutex<Vec<String>>,
    }

    impl MetricsSink for RecordingSink {
        fn emit(&self, metrics: &RunMetrics) {
            self.captured
                .lock()
                .unwrap()
                .push(metrics.strategy_slug.clone().unwrap_or_default());
        }
    }

    #[test]
    fn builder_tracks_phases_and_calls() {
        let mut builder = RunMetricsBuilder::new();
        builder.set_strategy_slug("news-brief");
        builder.start_phase("research");
        builder.record_api_call("sonar");
        builder.record_api_call("sonar");
        builder.record_evidence(4);
        builder.start_phase("finalize");
        builder.record_api_call("llm_analyzer");

        let metrics = builder.build();
        assert_eq!(metrics.strategy_slug.as_deref(), Some("news-brief"));
        assert_eq!(metrics.api_calls_by_adapter.get("sonar"), Some(&2));
        assert_eq!(metrics.evidence_count, 4);
        assert_eq!(metrics.total_api_calls(), 3);
        assert!(metrics.phase_durations.contains_key("research"));
        assert!(metrics.phase_durations.contains_key("finalize"));
    }

    #[test]
    fn record_diversity_scores_unique_domains_and_ignores_synthetic() {
        let mut builder = RunMetricsBuilder::new();
        let mut a = Evidence::new("https://a.com/1", "sonar");
        a.publisher = Some("A News".to_string());
        let mut b = Evidence::new("https://b.com/1", "exa");
        b.publisher = Some("B News".to_string());
        let synthetic = Evidence::new(Evidence::SYNTHETIC_URL, "llm_analyzer");

        builder.record_diversity(&[a, b, synthetic]);
        let metrics = builder.build();
        assert_eq!(metrics.unique_domains, 2);
        assert_eq!(metrics.unique_publishers, 2);
        assert_eq!(metrics.tools_used, 2);
        assert!((metrics.source_diversity_score - (0.5 * 1.0 + 0.5 * 0.2)).abs() < 1e-9);
    }

    #[test]
    fn sink_receives_built_metrics() {
        let sink = Arc::new(RecordingSink::default());
        let mut builder = RunMetricsBuilder::new();
        builder.set_strategy_slug("news-brief");
        let metrics = builder.build();
        sink.emit(&metrics);
        assert_eq!(sink.captured.lock().unwrap().as_slice(), ["news-brief"]);
    }
}
