//! Configuration loaded from the environment.
//!
//! `.env` files are honoured through `dotenvy`; every setting has a default
//! except the database URL and the LLM API key, which are only required by the
//! components that use them.

use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;
use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
}

impl Config {
    /// Load configuration from the process environment (and `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            database: DatabaseConfig::from_env()?,
            llm: LlmConfig::from_env()?,
            agent: AgentConfig::from_env()?,
        })
    }
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    url: Option<SecretString>,
    pub pool_size: usize,
    pub query_timeout: Duration,
}

impl DatabaseConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: optional_env("DATABASE_URL").map(SecretString::from),
            pool_size: parse_env("DATABASE_POOL_SIZE", 5)?,
            query_timeout: Duration::from_secs(parse_env("DATABASE_QUERY_TIMEOUT_SECS", 30)?),
        })
    }

    /// Build a config for an explicit URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(SecretString::from(url.into())),
            ..Self::default()
        }
    }

    /// The connection URL. Required once a PostgreSQL store is opened.
    pub fn url(&self) -> Result<&str, ConfigError> {
        self.url
            .as_ref()
            .map(|u| u.expose_secret())
            .ok_or_else(|| ConfigError::Missing {
                key: "DATABASE_URL".to_string(),
            })
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: 5,
            query_timeout: Duration::from_secs(30),
        }
    }
}

/// OpenAI-compatible chat completions endpoint settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl LlmConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            base_url: optional_env("LLM_BASE_URL")
                .unwrap_or(defaults.base_url)
                .trim_end_matches('/')
                .to_string(),
            api_key: optional_env("LLM_API_KEY")
                .or_else(|| optional_env("OPENAI_API_KEY"))
                .map(SecretString::from),
            model: optional_env("LLM_MODEL").unwrap_or(defaults.model),
            temperature: parse_env("LLM_TEMPERATURE", defaults.temperature)?,
            max_tokens: parse_env("LLM_MAX_TOKENS", defaults.max_tokens)?,
            timeout: Duration::from_secs(parse_env("LLM_TIMEOUT_SECS", 120)?),
        })
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            max_tokens: 2048,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Reasoning loop and memory settings.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Hard cap on reasoning iterations per user message.
    pub max_iterations: usize,
    /// Turns kept per session before eviction.
    pub memory_max_turns: usize,
    /// Cumulative content characters kept per session.
    pub memory_max_chars: usize,
    /// Tool payloads are truncated to this many characters in memory and in
    /// the observation sent back to the model.
    pub tool_output_max_chars: usize,
    /// Used when neither the tool call nor the request filters set a date.
    pub default_date_from: NaiveDate,
    pub default_date_to: NaiveDate,
}

impl AgentConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            max_iterations: parse_env("AGENT_MAX_ITERATIONS", defaults.max_iterations)?,
            memory_max_turns: parse_env("AGENT_MEMORY_MAX_TURNS", defaults.memory_max_turns)?,
            memory_max_chars: parse_env("AGENT_MEMORY_MAX_CHARS", defaults.memory_max_chars)?,
            tool_output_max_chars: parse_env(
                "AGENT_TOOL_OUTPUT_MAX_CHARS",
                defaults.tool_output_max_chars,
            )?,
            default_date_from: parse_env("AGENT_DEFAULT_DATE_FROM", defaults.default_date_from)?,
            default_date_to: parse_env("AGENT_DEFAULT_DATE_TO", defaults.default_date_to)?,
        };

        if config.max_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AGENT_MAX_ITERATIONS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if config.memory_max_turns == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AGENT_MEMORY_MAX_TURNS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if config.default_date_to < config.default_date_from {
            return Err(ConfigError::InvalidValue {
                key: "AGENT_DEFAULT_DATE_TO".to_string(),
                message: "must not precede AGENT_DEFAULT_DATE_FROM".to_string(),
            });
        }

        Ok(config)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            memory_max_turns: 50,
            memory_max_chars: 64_000,
            tool_output_max_chars: 4_000,
            default_date_from: NaiveDate::from_ymd_opt(2025, 8, 1).unwrap_or_default(),
            default_date_to: NaiveDate::from_ymd_opt(2025, 9, 18).unwrap_or_default(),
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}
