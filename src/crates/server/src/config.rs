//! Server configuration from the environment.

use std::time::Duration;

/// Everything the server binary needs, with development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address, e.g. `0.0.0.0:8000`.
    pub bind_addr: String,

    /// LLM bearer token.
    pub llm_api_key: String,

    /// OpenAI-compatible base URL.
    pub llm_base_url: String,

    /// Model identifier.
    pub llm_model: String,

    /// LLM request timeout.
    pub llm_timeout: Duration,

    /// Web-search bearer token.
    pub search_api_key: String,

    /// Web-search endpoint URL.
    pub search_endpoint: String,

    /// SQLite URL for the checkpoint store.
    pub database_url: String,

    /// Default review-loop bound.
    pub max_iterations: u32,
}

impl ServerConfig {
    /// Read configuration from environment variables, falling back to
    /// development defaults.
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8000"),
            llm_api_key: env_or("LLM_API_KEY", ""),
            llm_base_url: env_or(
                "LLM_BASE_URL",
                "https://dashscope.aliyuncs.com/compatible-mode/v1",
            ),
            llm_model: env_or("LLM_MODEL", "qwen-max"),
            llm_timeout: Duration::from_secs(
                env_or("LLM_TIMEOUT_SECS", "120").parse().unwrap_or(120),
            ),
            search_api_key: env_or("SEARCH_API_KEY", ""),
            search_endpoint: env_or("SEARCH_ENDPOINT", "https://api.bocha.cn/v1/web-search"),
            database_url: env_or("DATABASE_URL", "sqlite:deepcurrent.db?mode=rwc"),
            max_iterations: env_or("MAX_ITERATIONS", "3").parse().unwrap_or(3),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
