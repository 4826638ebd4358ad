//! Strategy document data model: the sum-type `ToolStep`, strategy metadata,
//! the index entry used by scope selection, and global LLM/prompt settings.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Time window a strategy targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    Day,
    Week,
    Month,
    Year,
}

/// Research depth a strategy targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Depth {
    Brief,
    Overview,
    Deep,
    Comprehensive,
}

/// Phase a tool-chain step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Research,
    Finalize,
}

impl Default for StepPhase {
    fn default() -> Self {
        Self::Research
    }
}

/// A single step in a strategy's tool chain.
///
/// Storage documents may use either the legacy shape (`name`/`params`/`loop`)
/// or the extended shape (`use`/`inputs`/...). [`ToolStep::from_document`]
/// normalizes both into this single internal representation, implementing
/// the sum-type re-architecture called for in the design notes: callers never
/// need to branch on which shape was stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolStep {
    /// Adapter selector, e.g. `"sonar"` or `"exa.contents"`.
    #[serde(rename = "use")]
    pub use_: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub llm_fill: Vec<String>,
    #[serde(default)]
    pub save_as: Option<String>,
    #[serde(default)]
    pub foreach: Option<String>,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub phase: StepPhase,
}

/// Raw step shape as it appears on the wire, accepting both the legacy and
/// extended document shapes before normalization.
#[derive(Debug, Clone, Deserialize)]
struct RawToolStep {
    // Legacy fields
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    params: HashMap<String, serde_json::Value>,
    #[serde(default, rename = "loop")]
    loop_count: Option<u32>,

    // Extended fields
    #[serde(default, rename = "use")]
    use_: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    inputs: HashMap<String, serde_json::Value>,
    #[serde(default)]
    llm_fill: Vec<String>,
    #[serde(default)]
    save_as: Option<String>,
    #[serde(default)]
    foreach: Option<String>,
    #[serde(default)]
    when: Option<String>,
    #[serde(default)]
    phase: Option<StepPhase>,
}

impl ToolStep {
    /// Normalize a raw wire-format step (legacy or extended) into the single
    /// internal representation used by the executor.
    pub fn from_value(value: serde_json::Value) -> crate::error::Result<Self> {
        let raw: RawToolStep = serde_json::from_value(value)?;
        let use_ = raw
            .use_
            .or(raw.name)
            .ok_or_else(|| crate::error::Error::invalid_strategy("", "step has neither 'use' nor 'name'"))?;

        let mut inputs = raw.inputs;
        for (k, v) in raw.params {
            inputs.entry(k).or_insert(v);
        }
        if let Some(n) = raw.loop_count {
            inputs.entry("loop".to_string()).or_insert(serde_json::json!(n));
        }

        Ok(ToolStep {
            use_,
            description: raw.description,
            inputs,
            llm_fill: raw.llm_fill,
            save_as: raw.save_as,
            foreach: raw.foreach,
            when: raw.when,
            phase: raw.phase.unwrap_or_default(),
        })
    }

    /// Split `use_` into `(adapter_name, capability_name)`. A selector with no
    /// dot implies the `call` capability, e.g. `"sonar"` -> `("sonar", "call")`.
    pub fn adapter_and_capability(&self) -> (&str, &str) {
        match self.use_.split_once('.') {
            Some((adapter, capability)) => (adapter, capability),
            None => (self.use_.as_str(), "call"),
        }
    }
}

/// Fan-out policy for strategy-level research passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FanOut {
    Simple(FanOutMode),
    Var {
        mode: FanOutVarMode,
        var: String,
        #[serde(default = "default_map_to")]
        map_to: String,
        #[serde(default)]
        limit: Option<usize>,
    },
}

fn default_map_to() -> String {
    "topic".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutMode {
    None,
    Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutVarMode {
    Var,
}

impl Default for FanOut {
    fn default() -> Self {
        Self::Simple(FanOutMode::None)
    }
}

/// A variable the scope classifier must populate for a strategy to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyVariable {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Strategy selection metadata, independent of the full strategy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyIndexEntry {
    pub slug: String,
    pub category: String,
    pub time_window: TimeWindow,
    pub depth: Depth,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub required_variables: Vec<StrategyVariable>,
    #[serde(default)]
    pub fan_out: FanOut,
}

fn default_priority() -> i64 {
    100
}

fn default_active() -> bool {
    true
}

/// `meta` block of a strategy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyMeta {
    pub slug: String,
    pub version: i64,
    pub category: String,
    pub time_window: TimeWindow,
    pub depth: Depth,
}

/// A named, versioned recipe governing one research execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub meta: StrategyMeta,
    #[serde(default)]
    pub queries: HashMap<String, String>,
    pub tool_chain: Vec<ToolStep>,
    #[serde(default)]
    pub limits: StrategyLimits,
    #[serde(default)]
    pub filters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub quorum: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub finalize: StrategyFinalize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyLimits {
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub max_llm_queries: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyFinalize {
    #[serde(default)]
    pub sections: Vec<String>,
}

/// Per-stage LLM defaults: model, temperature, max tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmStageDefaults {
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// Global settings loaded once at boot: per-stage LLM defaults and prompt templates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalSettings {
    pub llm_defaults: HashMap<String, LlmStageDefaults>,
    pub prompts: HashMap<String, String>,
}

impl GlobalSettings {
    /// At minimum these stages must be configured for a strategy to run end to end.
    pub const REQUIRED_STAGES: &'static [&'static str] = &[
        "scope_classifier",
        "fill",
        "summarize",
        "qc",
        "renderer",
        "analyzer",
    ];

    pub fn validate(&self) -> crate::error::Result<()> {
        for stage in Self::REQUIRED_STAGES {
            if !self.llm_defaults.contains_key(*stage) {
                return Err(crate::error::Error::Config(format!(
                    "missing llm_defaults entry for stage '{stage}'"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_step_normalizes_name_and_params() {
        let raw = serde_json::json!({"name": "sonar", "params": {"max_tokens": 500}});
        let step = ToolStep::from_value(raw).unwrap();
        assert_eq!(step.use_, "sonar");
        assert_eq!(step.inputs.get("max_tokens"), Some(&serde_json::json!(500)));
        assert_eq!(step.phase, StepPhase::Research);
    }

    #[test]
    fn extended_step_normalizes_use_and_inputs() {
        let raw = serde_json::json!({
            "use": "exa.contents",
            "inputs": {"top_k": 3},
            "save_as": "seed_results",
            "phase": "finalize"
        });
        let step = ToolStep::from_value(raw).unwrap();
        assert_eq!(step.use_, "exa.contents");
        assert_eq!(step.save_as.as_deref(), Some("seed_results"));
        assert_eq!(step.phase, StepPhase::Finalize);
    }

    #[test]
    fn step_without_use_or_name_is_invalid() {
        let raw = serde_json::json!({"inputs": {}});
        assert!(ToolStep::from_value(raw).is_err());
    }

    #[test]
    fn adapter_and_capability_split() {
        let step = ToolStep::from_value(serde_json::json!({"use": "exa.contents"})).unwrap();
        assert_eq!(step.adapter_and_capability(), ("exa", "contents"));

        let step = ToolStep::from_value(serde_json::json!({"use": "sonar"})).unwrap();
        assert_eq!(step.adapter_and_capability(), ("sonar", "call"));
    }

    #[test]
    fn fan_out_var_mode_parses() {
        let raw = serde_json::json!({"mode": "var", "var": "companies", "map_to": "topic", "limit": 2});
        let fan_out: FanOut = serde_json::from_value(raw).unwrap();
        match fan_out {
            FanOut::Var { var, map_to, limit, .. } => {
                assert_eq!(var, "companies");
                assert_eq!(map_to, "topic");
                assert_eq!(limit, Some(2));
            }
            _ => panic!("expected var fan-out"),
        }
    }

    #[test]
    fn fan_out_simple_mode_parses() {
        let fan_out: FanOut = serde_json::from_value(serde_json::json!("task")).unwrap();
        assert_eq!(fan_out, FanOut::Simple(FanOutMode::Task));
    }

    #[test]
    fn global_settings_validation_requires_all_stages() {
        let mut settings = GlobalSettings::default();
        assert!(settings.validate().is_err());
        for stage in GlobalSettings::REQUIRED_STAGES {
            settings.llm_defaults.insert(
                stage.to_string(),
                LlmStageDefaults {
                    model: "stub".into(),
                    temperature: None,
                    max_tokens: None,
                },
            );
        }
        assert!(settings.validate().is_ok());
    }
}
