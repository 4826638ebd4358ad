//! # scout-core
//!
//! Research-and-briefing pipeline execution engine: loads versioned
//! "strategy" documents describing a tool chain, classifies an incoming
//! request against them, and executes the resulting chain against search and
//! LLM-backed tool adapters to produce a cited, quality-checked briefing.
//!
//! ## Core components
//!
//! - **Store**: SQLite-backed strategy and global-settings storage, immutable
//!   after boot.
//! - **Classifier**: LLM-driven scope classification that selects a strategy.
//! - **Executor**: the pipeline state machine that walks a strategy's tool
//!   chain, dispatching to registered adapters and assembling a briefing.
//! - **Tools**: adapters over web search, neural search, and LLM analysis.
//!
//! ## Example
//!
//! ```rust,ignore
//! use scout_core::{Engine, EngineConfig, StrategyStoreBuilder};
//!
//! let config = EngineConfig::from_env()?;
//! let mut builder = StrategyStoreBuilder::open(&config.db_path)?;
//! builder.admit_strategy(strategy_document, index_entry)?;
//! builder.admit_global_settings(&global_settings)?;
//! let engine = Engine::from_config(config, builder.build()?)?;
//! let briefing = engine.run("latest funding rounds in AI labs").await?;
//! ```

pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod executor;
pub mod llm;
pub mod metrics;
pub mod model;
pub mod store;
pub mod template;
pub mod tools;

pub use classifier::{ScopeCache, ScopeClassification, ScopeClassifier};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Error, Result};
pub use evidence::{canonical_url, dedup_and_score, Evidence};
pub use executor::{Briefing, CitationEntry, ExecutionState, Executor};
pub use llm::{AnthropicClient, ClientConfig, CompletionRequest, LLMClient, OpenAIClient, Provider};
pub use metrics::{MetricsSink, RunMetrics, TracingMetricsSink};
pub use model::{
    Depth, FanOut, FanOutMode, FanOutVarMode, GlobalSettings, Strategy, StrategyIndexEntry, StrategyMeta,
    TimeWindow, ToolStep,
};
pub use store::{StrategyStore, StrategyStoreBuilder};
pub use tools::{AdapterOutput, Capability, ToolAdapter, ToolRegistry};
