//! Process configuration loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

fn env_var(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| Error::Config(format!("missing required environment variable {name}")))
}

fn env_var_opt(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Engine configuration, assembled once at process start from environment
/// variables. Never re-read mid-run — restart the process to pick up changes.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    pub anthropic_api_key: String,
    pub openai_api_key: String,
    pub sonar_api_key: String,
    pub exa_api_key: String,
    pub fan_out_limit: usize,
    pub request_timeout: Duration,
}

impl EngineConfig {
    const DEFAULT_FANOUT_LIMIT: usize = 4;
    const DEFAULT_TIMEOUT_MS: u64 = 60_000;

    /// Load configuration from the process environment.
    ///
    /// Required: `SCOUT_DB_PATH`, `ANTHROPIC_API_KEY`, `OPENAI_API_KEY`,
    /// `EXA_API_KEY`, and one of `SONAR_API_KEY`/`PERPLEXITY_API_KEY`.
    /// Optional: `SCOUT_FANOUT_LIMIT` (default 4), `SCOUT_REQUEST_TIMEOUT_MS`
    /// (default 60000).
    pub fn from_env() -> Result<Self> {
        let sonar_api_key = env_var_opt("SONAR_API_KEY")
            .or_else(|| env_var_opt("PERPLEXITY_API_KEY"))
            .ok_or_else(|| Error::Config("missing SONAR_API_KEY (or PERPLEXITY_API_KEY)".to_string()))?;

        let fan_out_limit = env_var_opt("SCOUT_FANOUT_LIMIT")
            .map(|v| v.parse::<usize>().map_err(|e| Error::Config(format!("invalid SCOUT_FANOUT_LIMIT: {e}"))))
            .transpose()?
            .unwrap_or(Self::DEFAULT_FANOUT_LIMIT);

        let timeout_ms = env_var_opt("SCOUT_REQUEST_TIMEOUT_MS")
            .map(|v| {
                v.parse::<u64>()
                    .map_err(|e| Error::Config(format!("invalid SCOUT_REQUEST_TIMEOUT_MS: {e}")))
            })
            .transpose()?
            .unwrap_or(Self::DEFAULT_TIMEOUT_MS);

        Ok(Self {
            db_path: PathBuf::from(env_var("SCOUT_DB_PATH")?),
            anthropic_api_key: env_var("ANTHROPIC_API_KEY")?,
            openai_api_key: env_var("OPENAI_API_KEY")?,
            sonar_api_key,
            exa_api_key: env_var("EXA_API_KEY")?,
            fan_out_limit,
            request_timeout: Duration::from_millis(timeout_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize these tests.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "SCOUT_DB_PATH",
            "ANTHROPIC_API_KEY",
            "OPENAI_API_KEY",
            "SONAR_API_KEY",
            "PERPLEXITY_API_KEY",
            "EXA_API_KEY",
            "SCOUT_FANOUT_LIMIT",
            "SCOUT_REQUEST_TIMEOUT_MS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn from_env_applies_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("SCOUT_DB_PATH", "/tmp/scout.db");
        std::env::set_var("ANTHROPIC_API_KEY", "a");
        std::env::set_var("OPENAI_API_KEY", "b");
        std::env::set_var("SONAR_API_KEY", "c");
        std::env::set_var("EXA_API_KEY", "d");

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.fan_out_limit, 4);
        assert_eq!(config.request_timeout, Duration::from_millis(60_000));
        clear_env();
    }

    #[test]
    fn from_env_fails_on_missing_required_key() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("SCOUT_DB_PATH", "/tmp/scout.db");
        let err = EngineConfig::from_env().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        clear_env();
    }

    #[test]
    fn from_env_accepts_perplexity_key_alias() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("SCOUT_DB_PATH", "/tmp/scout.db");
        std::env::set_var("ANTHROPIC_API_KEY", "a");
        std::env::set_var("OPENAI_API_KEY", "b");
        std::env::set_var("PERPLEXITY_API_KEY", "c");
        std::env::set_var("EXA_API_KEY", "d");

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.sonar_api_key, "c");
        clear_env();
    }
}
