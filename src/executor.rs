//! Pipeline executor: walks a strategy's tool chain against research
//! variables, then renders and quality-checks the finalize phase into a
//! [`Briefing`].
//!
//! Step dispatch, fan-out, and the finalize-phase QC checks below are
//! grounded in the graph node sequence (`research` -> `summarize` -> `write`
//! -> `qc`) of the pipeline this engine replaces; evidence accumulation and
//! dedup/scoring happen once per research phase, not per step, per the
//! recorded decision on cumulative `max_results`. Strategy-level fan-out
//! (`FanOut::Simple(Task)`/`FanOut::Var`) runs one research pass per task or
//! per resolved variable item, bounded by the same semaphore-gated
//! concurrency the per-step `foreach` fan-out already uses, merged back in
//! pass order before the single dedup/finalize pass; `qc()` there never
//! aborts a run, only appends to `errors`/`limitations`, which this executor
//! mirrors.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::evidence::{dedup_and_score, Evidence};
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};
use crate::metrics::RunMetricsBuilder;
use crate::model::{FanOut, FanOutMode, LlmStageDefaults, StepPhase, Strategy, ToolStep};
use crate::template;
use crate::tools::{AdapterOutput, ToolRegistry};

/// Mutable state threaded through step execution for one research pass: the
/// variable bindings templates resolve against, the evidence accumulated by
/// that pass, and any degraded-step/QC diagnostics recorded along the way.
#[derive(Debug, Default)]
pub struct ExecutionState {
    pub vars: HashMap<String, Value>,
    pub evidence: Vec<Evidence>,
    pub errors: Vec<String>,
    pub limitations: Vec<String>,
}

impl ExecutionState {
    pub fn new(initial_vars: HashMap<String, Value>) -> Self {
        Self {
            vars: initial_vars,
            evidence: Vec::new(),
            errors: Vec::new(),
            limitations: Vec::new(),
        }
    }
}

/// One entry in a briefing's citation registry: the stable 1-based number
/// assigned to a URL (shared by every inline reference to it) plus whatever
/// bibliographic detail is available.
#[derive(Debug, Clone, PartialEq)]
pub struct CitationEntry {
    pub number: usize,
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
}

/// Final output of a run: rendered sections (with inline citation links
/// rewritten to `text<sup>[N]</sup>`), the ordered citation display list, the
/// parallel numbered registry those links point at, and the full caller-facing
/// contract (variables, evidence, strategy slug, errors, limitations).
#[derive(Debug, Clone, Default)]
pub struct Briefing {
    pub strategy_slug: String,
    pub sections: HashMap<String, String>,
    pub citations: Vec<String>,
    pub citation_registry: Vec<CitationEntry>,
    pub variables: HashMap<String, Value>,
    pub evidence: Vec<Evidence>,
    pub errors: Vec<String>,
    pub limitations: Vec<String>,
}

#[derive(Debug, Default)]
struct StepReport {
    api_calls: Vec<String>,
}

#[derive(Clone)]
pub struct Executor {
    registry: Arc<ToolRegistry>,
    fill_client: Arc<dyn LLMClient>,
    fill_defaults: LlmStageDefaults,
    fan_out_limit: usize,
}

impl Executor {
    pub fn new(registry: Arc<ToolRegistry>, fill_client: Arc<dyn LLMClient>, fill_defaults: LlmStageDefaults, fan_out_limit: usize) -> Self {
        Self {
            registry,
            fill_client,
            fill_defaults,
            fan_out_limit: fan_out_limit.max(1),
        }
    }

    /// Run the research phase (one pass, or one concurrent pass per task/var
    /// item per `fan_out`), dedup/score the merged evidence, then run the
    /// finalize phase and assemble + QC the briefing. A request-wide
    /// `deadline` is checked between steps; once it passes, remaining steps
    /// are skipped, a `DeadlineExceeded` note is recorded, and whatever state
    /// was collected so far is still assembled into a best-effort briefing.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        strategy: &Strategy,
        strategy_slug: &str,
        initial_vars: HashMap<String, Value>,
        fan_out: &FanOut,
        tasks: &[String],
        today: chrono::NaiveDate,
        deadline: Option<Instant>,
        metrics: &mut RunMetricsBuilder,
    ) -> Result<Briefing> {
        let start = Instant::now();
        let budget = Arc::new(AtomicU32::new(0));

        let research_steps: Vec<ToolStep> = strategy
            .tool_chain
            .iter()
            .filter(|s| s.phase == StepPhase::Research)
            .cloned()
            .collect();
        let finalize_steps: Vec<ToolStep> = strategy
            .tool_chain
            .iter()
            .filter(|s| s.phase == StepPhase::Finalize)
            .cloned()
            .collect();

        let mut state = ExecutionState::new(initial_vars.clone());

        metrics.start_phase("research");
        if let Some(elapsed_ms) = check_deadline(start, deadline) {
            state.errors.push(Error::deadline_exceeded(elapsed_ms).to_string());
        } else {
            let pass_vars = build_pass_vars(fan_out, tasks, &initial_vars);
            if pass_vars.len() <= 1 {
                state.vars = pass_vars.into_iter().next().unwrap_or(initial_vars);
                for step in &research_steps {
                    if let Some(elapsed_ms) = check_deadline(start, deadline) {
                        state.errors.push(Error::deadline_exceeded(elapsed_ms).to_string());
                        break;
                    }
                    let report = self.run_step(step, &mut state, strategy.limits.max_llm_queries, &budget).await?;
                    for adapter in report.api_calls {
                        metrics.record_api_call(adapter);
                    }
                }
            } else {
                self.run_research_fan_out(
                    &research_steps,
                    pass_vars,
                    strategy.limits.max_llm_queries,
                    &budget,
                    deadline,
                    &mut state,
                    metrics,
                )
                .await?;
            }
        }

        state.evidence = dedup_and_score(std::mem::take(&mut state.evidence), today, strategy.limits.max_results);
        metrics.record_evidence(state.evidence.len());
        metrics.record_diversity(&state.evidence);

        metrics.start_phase("finalize");
        for step in &finalize_steps {
            if let Some(elapsed_ms) = check_deadline(start, deadline) {
                state.errors.push(Error::deadline_exceeded(elapsed_ms).to_string());
                break;
            }
            let report = self.run_step(step, &mut state, strategy.limits.max_llm_queries, &budget).await?;
            for adapter in report.api_calls {
                metrics.record_api_call(adapter);
            }
        }

        let briefing = self.assemble(strategy, strategy_slug, &state);
        metrics.end_phase();
        Ok(briefing)
    }

    /// Run one research pass per item in `pass_vars` concurrently, bounded by
    /// `fan_out_limit`, merging each pass's evidence/errors/limitations back
    /// into `state` in pass (iteration) order once every pass has finished.
    async fn run_research_fan_out(
        &self,
        research_steps: &[ToolStep],
        pass_vars: Vec<HashMap<String, Value>>,
        max_llm_queries: Option<u32>,
        budget: &Arc<AtomicU32>,
        deadline: Option<Instant>,
        state: &mut ExecutionState,
        metrics: &mut RunMetricsBuilder,
    ) -> Result<()> {
        let pass_count = pass_vars.len();
        let semaphore = Arc::new(Semaphore::new(self.fan_out_limit));
        let mut set = JoinSet::new();

        for (idx, vars) in pass_vars.into_iter().enumerate() {
            let executor = self.clone();
            let permit_sem = semaphore.clone();
            let budget = budget.clone();
            let steps = research_steps.to_vec();
            set.spawn(async move {
                let _permit = permit_sem.acquire_owned().await.expect("semaphore closed");
                let mut pass_state = ExecutionState::new(vars);
                let mut api_calls = Vec::new();
                for step in &steps {
                    if deadline_passed(deadline) {
                        pass_state.errors.push("deadline exceeded during fan-out research pass".to_string());
                        break;
                    }
                    match executor.run_step(step, &mut pass_state, max_llm_queries, &budget).await {
                        Ok(report) => api_calls.extend(report.api_calls),
                        Err(err) => return (idx, Err(err)),
                    }
                }
                (idx, Ok((pass_state, api_calls)))
            });
        }

        let mut results: Vec<Option<(ExecutionState, Vec<String>)>> = (0..pass_count).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            let (idx, outcome) = joined.map_err(|e| Error::Internal(e.to_string()))?;
            match outcome {
                Ok(pass_result) => results[idx] = Some(pass_result),
                Err(err) => return Err(err),
            }
        }

        for (pass_state, api_calls) in results.into_iter().flatten() {
            state.evidence.extend(pass_state.evidence);
            state.errors.extend(pass_state.errors);
            state.limitations.extend(pass_state.limitations);
            for adapter in api_calls {
                metrics.record_api_call(adapter);
            }
        }

        Ok(())
    }

    fn step_consumes_llm_budget(adapter_name: &str) -> bool {
        adapter_name == "llm_analyzer"
    }

    async fn run_step(
        &self,
        step: &ToolStep,
        state: &mut ExecutionState,
        max_llm_queries: Option<u32>,
        budget: &AtomicU32,
    ) -> Result<StepReport> {
        if let Some(when) = &step.when {
            if !template::eval_when(when, &state.vars) {
                return Ok(StepReport::default());
            }
        }

        let (adapter_name, capability_name) = step.adapter_and_capability();

        if Self::step_consumes_llm_budget(adapter_name) {
            if let Some(limit) = max_llm_queries {
                if budget.load(Ordering::SeqCst) >= limit {
                    state
                        .errors
                        .push(format!("step '{}' degraded: {}", step.use_, Error::budget_exceeded(limit)));
                    return Ok(StepReport::default());
                }
            }
        }

        let base_inputs = if step.llm_fill.is_empty() {
            step.inputs.clone()
        } else {
            match self.fill_inputs(step, state, max_llm_queries, budget).await {
                Ok(inputs) => inputs,
                Err(err) if !err.is_request_fatal() => {
                    state.errors.push(format!("step '{}' degraded: {err}", step.use_));
                    return Ok(StepReport::default());
                }
                Err(err) => return Err(err),
            }
        };

        let per_task_vars: Vec<HashMap<String, Value>> = match &step.foreach {
            Some(expr) => {
                let items = template::eval_list_expr(expr, &state.vars).ok_or_else(|| {
                    Error::invalid_strategy("", format!("foreach expression '{expr}' did not resolve to a list"))
                })?;
                items
                    .into_iter()
                    .map(|item| {
                        let mut vars = state.vars.clone();
                        vars.insert("item".to_string(), item);
                        vars
                    })
                    .collect()
            }
            None => vec![state.vars.clone()],
        };

        let rendered_inputs: Vec<HashMap<String, Value>> = per_task_vars
            .iter()
            .map(|vars| template::render_inputs(&base_inputs, vars))
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.fan_out_limit));
        let mut set = JoinSet::new();
        for inputs in rendered_inputs {
            let registry = self.registry.clone();
            let permit_sem = semaphore.clone();
            let adapter = adapter_name.to_string();
            let capability = capability_name.to_string();
            set.spawn(async move {
                let _permit = permit_sem.acquire_owned().await.expect("semaphore closed");
                dispatch_with_retry(&registry, &adapter, &capability, &inputs).await
            });
        }

        let mut outputs = Vec::new();
        while let Some(joined) = set.join_next().await {
            let dispatched = joined.map_err(|e| Error::Internal(e.to_string()))?;
            match dispatched {
                Ok(output) => outputs.push(output),
                Err(err) if err.is_request_fatal() => return Err(err),
                Err(err) => {
                    state.errors.push(format!("step '{}' degraded: {err}", step.use_));
                }
            }
        }

        if Self::step_consumes_llm_budget(adapter_name) {
            budget.fetch_add(1, Ordering::SeqCst);
        }

        let mut collected_evidence = Vec::new();
        let mut text_outputs = Vec::new();
        for output in outputs {
            match output {
                AdapterOutput::Evidence(ev) => collected_evidence.extend(ev),
                AdapterOutput::Text(text) => text_outputs.push(text),
            }
        }

        if let Some(save_as) = &step.save_as {
            let value = if collected_evidence.is_empty() && !text_outputs.is_empty() {
                if text_outputs.len() == 1 {
                    Value::String(text_outputs[0].clone())
                } else {
                    Value::Array(text_outputs.iter().cloned().map(Value::String).collect())
                }
            } else {
                serde_json::to_value(&collected_evidence).unwrap_or(Value::Null)
            };
            state.vars.insert(save_as.clone(), value);
        }

        state.evidence.extend(collected_evidence);
        Ok(StepReport {
            api_calls: vec![adapter_name.to_string()],
        })
    }

    /// Use the fill-stage LLM to populate `step.llm_fill`-named inputs that
    /// the strategy document left for the model to decide (e.g. a generated
    /// search query), respecting `max_llm_queries` if the strategy sets one.
    async fn fill_inputs(
        &self,
        step: &ToolStep,
        state: &ExecutionState,
        max_llm_queries: Option<u32>,
        budget: &AtomicU32,
    ) -> Result<HashMap<String, Value>> {
        if let Some(limit) = max_llm_queries {
            if budget.load(Ordering::SeqCst) >= limit {
                return Err(Error::budget_exceeded(limit));
            }
        }

        let prompt = format!(
            "Step: {}\nCurrent variables: {}\nRespond with a single JSON object filling exactly these keys: {}.",
            step.description.as_deref().unwrap_or("(no description)"),
            serde_json::to_string(&state.vars).unwrap_or_default(),
            step.llm_fill.join(", "),
        );

        let request = CompletionRequest::new()
            .with_model(self.fill_defaults.model.clone())
            .with_system("You fill in missing tool-call parameters as strict JSON. Respond with JSON only, no prose.")
            .with_message(ChatMessage::user(prompt))
            .with_temperature(self.fill_defaults.temperature.unwrap_or(0.2))
            .with_max_tokens(self.fill_defaults.max_tokens.unwrap_or(256));

        let response = self.fill_client.complete(request).await?;
        budget.fetch_add(1, Ordering::SeqCst);

        let filled: HashMap<String, Value> = serde_json::from_str(response.content.trim())
            .map_err(|e| Error::adapter_permanent("fill", e.to_string()))?;

        let mut merged = step.inputs.clone();
        for key in &step.llm_fill {
            if let Some(v) = filled.get(key) {
                merged.insert(key.clone(), v.clone());
            }
        }
        Ok(merged)
    }

    fn assemble(&self, strategy: &Strategy, strategy_slug: &str, state: &ExecutionState) -> Briefing {
        let mut sections = HashMap::new();
        for name in &strategy.finalize.sections {
            let text = state
                .vars
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_default();
            sections.insert(name.clone(), text);
        }

        let citation_registry = assemble_citations(strategy, &mut sections, &state.evidence);

        let citations: Vec<String> = state
            .evidence
            .iter()
            .filter(|e| !e.is_synthetic())
            .map(Evidence::citation_display)
            .collect();

        let mut limitations = state.limitations.clone();
        qc_structure(strategy, &sections, &mut limitations);
        qc_citations(&citations, &mut limitations);
        qc_quorum(strategy, &state.evidence, &mut limitations);
        qc_numeric_contradiction(&state.evidence, &mut limitations);

        Briefing {
            strategy_slug: strategy_slug.to_string(),
            sections,
            citations,
            citation_registry,
            variables: state.vars.clone(),
            evidence: state.evidence.clone(),
            errors: state.errors.clone(),
            limitations,
        }
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.map(|d| Instant::now() >= d).unwrap_or(false)
}

fn check_deadline(start: Instant, deadline: Option<Instant>) -> Option<u64> {
    if deadline_passed(deadline) {
        Some(start.elapsed().as_millis() as u64)
    } else {
        None
    }
}

/// Resolve a strategy's fan-out policy against the deterministic task split
/// and whatever variables classification/earlier steps have bound, producing
/// one variable-binding set per research pass. `FanOut::Simple(None)` always
/// yields exactly one pass (the common case).
fn build_pass_vars(fan_out: &FanOut, tasks: &[String], initial_vars: &HashMap<String, Value>) -> Vec<HashMap<String, Value>> {
    match fan_out {
        FanOut::Simple(FanOutMode::None) => vec![initial_vars.clone()],
        FanOut::Simple(FanOutMode::Task) => {
            if tasks.is_empty() {
                vec![initial_vars.clone()]
            } else {
                tasks
                    .iter()
                    .map(|task| {
                        let mut vars = initial_vars.clone();
                        vars.insert("topic".to_string(), Value::String(task.clone()));
                        vars
                    })
                    .collect()
            }
        }
        FanOut::Var { var, map_to, limit, .. } => {
            let items: Vec<Value> = match initial_vars.get(var) {
                Some(Value::Array(arr)) => arr.clone(),
                Some(other) => vec![other.clone()],
                None => Vec::new(),
            };
            let items: Vec<Value> = match limit {
                Some(n) => items.into_iter().take(*n).collect(),
                None => items,
            };
            if items.is_empty() {
                vec![initial_vars.clone()]
            } else {
                items
                    .into_iter()
                    .map(|item| {
                        let mut vars = initial_vars.clone();
                        vars.insert(map_to.clone(), item);
                        vars
                    })
                    .collect()
            }
        }
    }
}

/// Retry a dispatch on `AdapterTransient` failures with bounded exponential
/// backoff (100ms, 200ms), degrading to the final error once attempts are
/// exhausted rather than retrying forever.
async fn dispatch_with_retry(
    registry: &ToolRegistry,
    adapter_name: &str,
    capability_name: &str,
    inputs: &HashMap<String, Value>,
) -> Result<AdapterOutput> {
    const MAX_ATTEMPTS: u32 = 3;
    let mut attempt = 0;
    loop {
        match registry.dispatch(adapter_name, capability_name, inputs).await {
            Ok(output) => return Ok(output),
            Err(err @ Error::AdapterTransient { .. }) if attempt + 1 < MAX_ATTEMPTS => {
                attempt += 1;
                let backoff_ms = 100u64 * (1u64 << (attempt - 1));
                tracing::warn!(error = %err, adapter = adapter_name, attempt, "retrying transient adapter error");
                tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

static LINK: std::sync::LazyLock<regex::Regex> =
    std::sync::LazyLock::new(|| regex::Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").unwrap());

/// Scan the rendered finalize sections for inline markdown links in
/// appearance order, union with non-synthetic evidence URLs not already
/// referenced, assign stable 1-based numbers (first appearance wins, repeats
/// share a number), rewrite each link to `text<sup>[N]</sup>` in place, and
/// return the parallel registry the numbers point at.
fn assemble_citations(strategy: &Strategy, sections: &mut HashMap<String, String>, evidence: &[Evidence]) -> Vec<CitationEntry> {
    let mut numbers: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for name in &strategy.finalize.sections {
        if let Some(text) = sections.get(name) {
            for caps in LINK.captures_iter(text) {
                let url = caps[2].to_string();
                if !numbers.contains_key(&url) {
                    numbers.insert(url.clone(), order.len() + 1);
                    order.push(url);
                }
            }
        }
    }

    for e in evidence.iter().filter(|e| !e.is_synthetic()) {
        if !numbers.contains_key(&e.url) {
            numbers.insert(e.url.clone(), order.len() + 1);
            order.push(e.url.clone());
        }
    }

    for name in &strategy.finalize.sections {
        if let Some(text) = sections.get(name) {
            let rewritten = LINK.replace_all(text, |caps: &regex::Captures| {
                let label = &caps[1];
                let url = &caps[2];
                let n = numbers.get(url).copied().unwrap_or(0);
                format!("{label}<sup>[{n}]</sup>")
            });
            sections.insert(name.clone(), rewritten.into_owned());
        }
    }

    order
        .into_iter()
        .enumerate()
        .map(|(i, url)| {
            let matching = evidence.iter().find(|e| e.url == url);
            CitationEntry {
                number: i + 1,
                title: matching.and_then(|e| e.title.clone()),
                snippet: matching.and_then(|e| e.snippet.clone()),
                url,
            }
        })
        .collect()
}

fn qc_structure(strategy: &Strategy, sections: &HashMap<String, String>, warnings: &mut Vec<String>) {
    for name in &strategy.finalize.sections {
        match sections.get(name) {
            Some(text) if !text.is_empty() => {}
            _ => warnings.push(format!("section '{name}' is missing or empty")),
        }
    }
}

fn qc_citations(citations: &[String], warnings: &mut Vec<String>) {
    if citations.is_empty() {
        warnings.push("no citations were produced".to_string());
    }
}

fn qc_quorum(strategy: &Strategy, evidence: &[Evidence], warnings: &mut Vec<String>) {
    if let Some(min) = strategy.quorum.get("min_evidence").and_then(Value::as_u64) {
        if (evidence.len() as u64) < min {
            warnings.push(format!("quorum not met: {} evidence items, minimum {min}", evidence.len()));
        }
    }
}

/// Advisory only (decision: numeric contradictions are surfaced, not
/// fatal): flags when two or more distinct numeric tokens with a shared
/// unit (`%` or `$`) appear across the evidence set, since that can signal
/// sources disagreeing on a reported figure.
fn qc_numeric_contradiction(evidence: &[Evidence], warnings: &mut Vec<String>) {
    static PATTERN: std::sync::LazyLock<regex::Regex> =
        std::sync::LazyLock::new(|| regex::Regex::new(r"\$\d+(?:\.\d+)?[BMK]?|\d+(?:\.\d+)?%").unwrap());

    let mut seen: HashMap<&'static str, std::collections::HashSet<String>> = HashMap::new();
    for e in evidence {
        let Some(snippet) = e.snippet.as_deref() else { continue };
        for m in PATTERN.find_iter(snippet) {
            let token = m.as_str();
            let bucket = if token.starts_with('$') { "dollar" } else { "percent" };
            seen.entry(bucket).or_default().insert(token.to_string());
        }
    }
    for (bucket, values) in seen {
        if values.len() > 1 {
            let mut sorted: Vec<&String> = values.iter().collect();
            sorted.sort();
            warnings.push(format!(
                "possible numeric contradiction ({bucket}): {}",
                sorted.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            ));
        }
    }
}
