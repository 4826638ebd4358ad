//! Tool adapters and the process-wide registry that resolves a step's `use`
//! selector to an adapter + capability.

pub mod llm_analyzer;
pub mod neural_search;
pub mod web_search;

use crate::error::{Error, Result};
use crate::evidence::Evidence;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A capability an adapter may expose. The executor asserts that the adapter
/// registered under a step's adapter name declares the capability the step's
/// `use` selector asks for, distinguishing "tool not registered" (`UnknownTool`)
/// from "tool registered but missing this capability" (`UnknownCapability`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Call,
    Search,
    Contents,
    FindSimilar,
    Answer,
}

impl Capability {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "call" => Some(Self::Call),
            "search" => Some(Self::Search),
            "contents" => Some(Self::Contents),
            "find_similar" => Some(Self::FindSimilar),
            "answer" => Some(Self::Answer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Search => "search",
            Self::Contents => "contents",
            Self::FindSimilar => "find_similar",
            Self::Answer => "answer",
        }
    }
}

/// Output of dispatching a capability: either a batch of evidence, or (for
/// `answer`) a plain text artifact, which the executor wraps as a single
/// synthetic evidence item if `save_as` is not set for the step.
#[derive(Debug, Clone)]
pub enum AdapterOutput {
    Evidence(Vec<Evidence>),
    Text(String),
}

/// Uniform wrapper over an external search/LLM provider.
///
/// Adapters must accept unknown keyword inputs gracefully (forward or ignore)
/// so that strategy documents can evolve without code changes; see each
/// adapter's `dispatch` implementation for how it filters its own params.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Registry key this adapter is bound to at registration time.
    fn name(&self) -> &str;

    /// Capabilities this adapter declares; dispatch asserts membership before invoking.
    fn capabilities(&self) -> &'static [Capability];

    /// Invoke the requested capability with rendered inputs.
    async fn dispatch(&self, capability: Capability, inputs: &HashMap<String, Value>) -> Result<AdapterOutput>;
}

impl std::fmt::Debug for dyn ToolAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolAdapter").field("name", &self.name()).finish()
    }
}

/// Process-wide, name-keyed mapping `tool_name -> adapter`. Populated at
/// startup by [`ToolRegistry::register`]; read-only afterward via `get`.
#[derive(Default)]
pub struct ToolRegistry {
    adapters: HashMap<String, Arc<dyn ToolAdapter>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit an adapter; fails if `name` is already bound.
    pub fn register(&mut self, adapter: Arc<dyn ToolAdapter>) -> Result<()> {
        let name = adapter.name().to_string();
        if self.adapters.contains_key(&name) {
            return Err(Error::Internal(format!("tool '{name}' already registered")));
        }
        self.adapters.insert(name, adapter);
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ToolAdapter>> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| Error::unknown_tool(name))
    }

    /// Resolve a step's `use` selector (`"sonar"` or `"exa.contents"`) to an
    /// adapter and asserted capability, then dispatch.
    pub async fn dispatch(
        &self,
        adapter_name: &str,
        capability_name: &str,
        inputs: &HashMap<String, Value>,
    ) -> Result<AdapterOutput> {
        let adapter = self.get(adapter_name)?;
        let capability = Capability::parse(capability_name)
            .ok_or_else(|| Error::unknown_capability(adapter_name, capability_name))?;
        if !adapter.capabilities().contains(&capability) {
            return Err(Error::unknown_capability(adapter_name, capability_name));
        }
        adapter.dispatch(capability, inputs).await
    }

    pub fn count(&self) -> usize {
        self.adapters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubAdapter {
        name: String,
    }

    #[async_trait]
    impl ToolAdapter for StubAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        fn capabilities(&self) -> &'static [Capability] {
            &[Capability::Call]
        }

        async fn dispatch(&self, _capability: Capability, _inputs: &HashMap<String, Value>) -> Result<AdapterOutput> {
            Ok(AdapterOutput::Evidence(vec![Evidence::new("http://x.com", &self.name)]))
        }
    }

    #[test]
    fn register_rejects_duplicate_names() {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(StubAdapter { name: "sonar".into() }))
            .unwrap();
        let err = registry
            .register(Arc::new(StubAdapter { name: "sonar".into() }))
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn get_fails_on_unregistered_name() {
        let registry = ToolRegistry::new();
        let err = registry.get("nonexistent").unwrap_err();
        assert!(matches!(err, Error::UnknownTool(_)));
    }

    #[tokio::test]
    async fn dispatch_fails_on_unsupported_capability() {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(StubAdapter { name: "sonar".into() }))
            .unwrap();
        let err = registry
            .dispatch("sonar", "contents", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownCapability { .. }));
    }

    #[tokio::test]
    async fn dispatch_succeeds_on_supported_capability() {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(StubAdapter { name: "sonar".into() }))
            .unwrap();
        let output = registry.dispatch("sonar", "call", &HashMap::new()).await.unwrap();
        match output {
            AdapterOutput::Evidence(ev) => assert_eq!(ev.len(), 1),
            _ => panic!("expected evidence output"),
        }
    }
}
