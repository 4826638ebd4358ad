//! LLM client abstraction used by scope classification, per-step `llm_fill`,
//! and the `llm_analyzer` tool adapter.
//!
//! ## Example
//!
//! ```rust,ignore
//! use scout_core::llm::{AnthropicClient, ClientConfig, CompletionRequest, ChatMessage, LLMClient};
//!
//! let client = AnthropicClient::new(
//!     ClientConfig::new("your-api-key").with_default_model("claude-3-5-sonnet-20241022"),
//! );
//!
//! let request = CompletionRequest::new().with_message(ChatMessage::user("Hello"));
//! let response = client.complete(request).await?;
//! ```

mod cache;
mod client;
mod types;

pub use cache::CacheKey;
pub use client::{AnthropicClient, ClientConfig, LLMClient, OpenAIClient};
pub use types::{
    CacheControl, ChatMessage, ChatRole, CompletionRequest, CompletionResponse, CostTracker,
    ModelCosts, ModelSpec, ModelTier, Provider, StopReason, TokenUsage,
};
