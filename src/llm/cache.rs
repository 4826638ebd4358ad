//! Content-addressed cache keys for LLM-call memoization.
//!
//! Used by [`crate::classifier::ScopeCache`] to avoid re-issuing an identical
//! scope-classification completion for a request the engine has already seen.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::types::ChatMessage;

/// A content hash identifying a `(system, messages)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub String);

impl CacheKey {
    /// Generate a cache key from messages and system prompt.
    pub fn generate(system: Option<&str>, messages: &[ChatMessage]) -> Self {
        let mut hasher = Sha256::new();

        if let Some(s) = system {
            hasher.update(b"system:");
            hasher.update(s.as_bytes());
            hasher.update(b"\n");
        }

        for msg in messages {
            hasher.update(format!("{}:", msg.role as u8).as_bytes());
            hasher.update(msg.content.as_bytes());
            hasher.update(b"\n");
        }

        let hash = hasher.finalize();
        CacheKey(format!("{:x}", hash))
    }

    /// Generate a cache key from raw content, e.g. a normalized request string.
    pub fn from_content(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let hash = hasher.finalize();
        CacheKey(format!("{:x}", hash))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ChatRole;

    #[test]
    fn cache_key_generation_is_stable_and_content_sensitive() {
        let messages = vec![
            ChatMessage {
                role: ChatRole::User,
                content: "Hello".to_string(),
                cache_control: None,
            },
            ChatMessage {
                role: ChatRole::Assistant,
                content: "Hi there".to_string(),
                cache_control: None,
            },
        ];

        let key1 = CacheKey::generate(Some("System prompt"), &messages);
        let key2 = CacheKey::generate(Some("System prompt"), &messages);
        let key3 = CacheKey::generate(Some("Different prompt"), &messages);

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
    }

    #[test]
    fn cache_key_from_content() {
        let key1 = CacheKey::from_content("request:news:AI labs");
        let key2 = CacheKey::from_content("request:news:AI labs");
        let key3 = CacheKey::from_content("request:news:robotics");

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
    }
}
