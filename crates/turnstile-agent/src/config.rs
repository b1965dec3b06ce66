//! Agent configuration.
//!
//! [`AgentConfig`] is plain serde data with defaults for every field.  It can
//! be loaded from a TOML or JSON file (chosen by extension) and then
//! overridden from `TURNSTILE_*` environment variables.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AgentError, Result};
use crate::provider::Provider;
use crate::pruning::PruningStrategy;
use crate::tokens::DEFAULT_CACHE_BYTES;
use crate::turn::DEFAULT_COMPLETION_MARKER;

pub const ENV_PROVIDER: &str = "TURNSTILE_PROVIDER";
pub const ENV_MODEL: &str = "TURNSTILE_MODEL";
pub const ENV_MAX_ITERATIONS: &str = "TURNSTILE_MAX_ITERATIONS";
pub const ENV_MAX_CONTEXT_TOKENS: &str = "TURNSTILE_MAX_CONTEXT_TOKENS";
pub const ENV_PRUNING_STRATEGY: &str = "TURNSTILE_PRUNING_STRATEGY";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a careful coding agent. Use the available tools to \
inspect and change the workspace. When the task is finished, summarize what you did and end \
your reply with [[TASK_COMPLETE]].";

/// Runtime configuration for the conversation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Provider name, e.g. `openai`, `anthropic`, `openrouter`.
    pub provider: String,
    pub model: String,
    /// Upper bound on model calls per task.
    pub max_iterations: u32,
    /// Context window of the model, in tokens.
    pub max_context_tokens: usize,
    pub strategy: PruningStrategy,
    pub completion_marker: String,
    pub system_prompt: String,
    /// Budget for cached token-estimate keys, in bytes.
    pub token_cache_bytes: u64,
    /// Parallel file reads when loading prompt context.
    pub context_concurrency: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: String::new(),
            max_iterations: 50,
            max_context_tokens: 128_000,
            strategy: PruningStrategy::Adaptive,
            completion_marker: DEFAULT_COMPLETION_MARKER.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            token_cache_bytes: DEFAULT_CACHE_BYTES,
            context_concurrency: 4,
        }
    }
}

impl AgentConfig {
    /// The configured provider.
    pub fn provider(&self) -> Provider {
        Provider::new(&self.provider, &self.model)
    }

    /// Load from a `.json` or `.toml` file.  Any other extension is read as
    /// TOML.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| AgentError::ConfigError {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;

        let config: Self = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(|e| AgentError::ConfigError {
                reason: format!("failed to parse JSON config: {e}"),
            })?
        } else {
            toml::from_str(&content).map_err(|e| AgentError::ConfigError {
                reason: format!("failed to parse TOML config: {e}"),
            })?
        };

        config.validate()?;
        info!(path = %path.display(), provider = %config.provider, "configuration loaded");
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_env_overrides_from(std::env::vars())
    }

    /// Apply overrides from `vars`.  Unknown keys are ignored.
    pub fn apply_env_overrides_from<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let key = key.as_ref();
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            match key {
                ENV_PROVIDER => self.provider = value.to_lowercase(),
                ENV_MODEL => self.model = value.to_owned(),
                ENV_MAX_ITERATIONS => self.max_iterations = parse_number(key, value)?,
                ENV_MAX_CONTEXT_TOKENS => self.max_context_tokens = parse_number(key, value)?,
                ENV_PRUNING_STRATEGY => self.strategy = value.parse()?,
                _ => continue,
            }
            debug!(key, "configuration overridden from environment");
        }
        self.validate()
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.provider.trim().is_empty() {
            return Err(AgentError::ConfigError {
                reason: "provider must not be empty".into(),
            });
        }
        if self.max_iterations == 0 {
            return Err(AgentError::ConfigError {
                reason: "max_iterations must be at least 1".into(),
            });
        }
        if self.context_concurrency == 0 {
            return Err(AgentError::ConfigError {
                reason: "context_concurrency must be at least 1".into(),
            });
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| AgentError::ConfigError {
        reason: format!("{key} must be a non-negative integer, got '{value}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.max_iterations, 50);
        assert_eq!(config.max_context_tokens, 128_000);
        assert_eq!(config.strategy, PruningStrategy::Adaptive);
        assert_eq!(config.completion_marker, "[[TASK_COMPLETE]]");
        assert_eq!(config.context_concurrency, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_toml_and_json() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("agent.toml");
        std::fs::write(
            &toml_path,
            "provider = \"anthropic\"\nmax_iterations = 12\nstrategy = \"sliding_window\"\n",
        )
        .unwrap();
        let config = AgentConfig::load_from_file(&toml_path).unwrap();
        assert_eq!(config.provider, "anthropic");
        assert_eq!(config.max_iterations, 12);
        assert_eq!(config.strategy, PruningStrategy::SlidingWindow);
        assert_eq!(config.max_context_tokens, 128_000);

        let json_path = dir.path().join("agent.json");
        std::fs::write(&json_path, r#"{"provider":"deepseek","max_context_tokens":64000}"#).unwrap();
        let config = AgentConfig::load_from_file(&json_path).unwrap();
        assert_eq!(config.provider, "deepseek");
        assert_eq!(config.max_context_tokens, 64_000);
    }

    #[test]
    fn invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "max_iterations = \"lots\"").unwrap();
        let err = AgentConfig::load_from_file(&path).unwrap_err();
        assert!(matches!(err, AgentError::ConfigError { .. }));
    }

    #[test]
    fn env_overrides() {
        let mut config = AgentConfig::default();
        config
            .apply_env_overrides_from([
                (ENV_PROVIDER, "OpenRouter"),
                (ENV_MAX_ITERATIONS, "7"),
                (ENV_PRUNING_STRATEGY, "importance"),
                ("UNRELATED", "x"),
            ])
            .unwrap();
        assert_eq!(config.provider, "openrouter");
        assert_eq!(config.max_iterations, 7);
        assert_eq!(config.strategy, PruningStrategy::Importance);

        let err = config
            .apply_env_overrides_from([(ENV_MAX_CONTEXT_TOKENS, "many")])
            .unwrap_err();
        assert!(err.to_string().contains(ENV_MAX_CONTEXT_TOKENS));
    }
}
