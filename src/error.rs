//! Error types for scout-core.

use thiserror::Error;

/// Result type alias using scout-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during engine operation.
///
/// Variants map directly onto the error kinds the executor and store
/// distinguish at runtime: request-fatal, boot-fatal, and degrade-in-place.
/// See [`Error::is_request_fatal`] for the propagation policy.
#[derive(Error, Debug)]
pub enum Error {
    /// A tool-chain step referenced an adapter name that was never registered.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// An adapter is registered but does not implement the requested capability.
    #[error("adapter '{adapter}' does not implement capability '{capability}'")]
    UnknownCapability { adapter: String, capability: String },

    /// `get_strategy` was called with a slug absent from the boot-time cache.
    #[error("strategy not found: {0}")]
    StrategyNotFound(String),

    /// A strategy document failed schema validation or internal consistency checks.
    #[error("invalid strategy '{slug}': {message}")]
    InvalidStrategy { slug: String, message: String },

    /// The scope classifier produced no usable strategy selection.
    #[error("request could not be scoped: {0}")]
    UnscopedRequest(String),

    /// The scope classifier's LLM call failed outright (no credentials, transport down).
    #[error("scope classification failed: {0}")]
    LlmClassificationFailed(String),

    /// Attempted mutation of a cache after it was sealed at boot. Programmer error.
    #[error("attempted mutation of immutable cache: {0}")]
    ImmutableCache(String),

    /// Network/5xx/rate-limit error from an adapter; retried with backoff upstream.
    #[error("transient adapter error ({adapter}): {message}")]
    AdapterTransient { adapter: String, message: String },

    /// Bad request, bad credentials, or malformed adapter response. Request-fatal.
    #[error("adapter error ({adapter}): {message}")]
    AdapterPermanent { adapter: String, message: String },

    /// `limits.max_llm_queries` was exhausted; further LLM-requiring steps degrade.
    #[error("LLM query budget exceeded ({limit} queries)")]
    BudgetExceeded { limit: u32 },

    /// The request-wide deadline elapsed before the run finished.
    #[error("request deadline exceeded after {elapsed_ms}ms")]
    DeadlineExceeded { elapsed_ms: u64 },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Durable store I/O error.
    #[error("store error: {0}")]
    Store(String),

    /// Configuration error (missing credential, malformed env var).
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal invariant violation not covered by a more specific kind.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn unknown_tool(name: impl Into<String>) -> Self {
        Self::UnknownTool(name.into())
    }

    pub fn unknown_capability(adapter: impl Into<String>, capability: impl Into<String>) -> Self {
        Self::UnknownCapability {
            adapter: adapter.into(),
            capability: capability.into(),
        }
    }

    pub fn strategy_not_found(slug: impl Into<String>) -> Self {
        Self::StrategyNotFound(slug.into())
    }

    pub fn invalid_strategy(slug: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidStrategy {
            slug: slug.into(),
            message: message.into(),
        }
    }

    pub fn adapter_transient(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AdapterTransient {
            adapter: adapter.into(),
            message: message.into(),
        }
    }

    pub fn adapter_permanent(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AdapterPermanent {
            adapter: adapter.into(),
            message: message.into(),
        }
    }

    pub fn budget_exceeded(limit: u32) -> Self {
        Self::BudgetExceeded { limit }
    }

    pub fn deadline_exceeded(elapsed_ms: u64) -> Self {
        Self::DeadlineExceeded { elapsed_ms }
    }

    /// Whether this error kind surfaces to the caller as a request-fatal failure
    /// (no partial result) rather than being degraded in place by the executor.
    ///
    /// `AdapterTransient`, `BudgetExceeded`, and `DeadlineExceeded` are recovered
    /// locally by the executor and never reach this check in practice; they are
    /// included here for completeness of the propagation table in the design.
    pub fn is_request_fatal(&self) -> bool {
        !matches!(
            self,
            Self::AdapterTransient { .. }
                | Self::BudgetExceeded { .. }
                | Self::DeadlineExceeded { .. }
        )
    }
}
