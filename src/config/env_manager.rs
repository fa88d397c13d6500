use std::env;

use tracing::debug;

use super::Config;

/// Values read from the process environment that override the config file
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    /// `GITHUB_TOKEN`
    pub github_token: Option<String>,
    /// `GITHUB_API_BASE_URL`
    pub github_api_base_url: Option<String>,
    /// `THINKTEST_DATABASE_URL`
    pub database_url: Option<String>,
    /// `THINKTEST_BIND_ADDR`
    pub bind_addr: Option<String>,
    /// `THINKTEST_LLM_ENDPOINT`
    pub llm_endpoint: Option<String>,
    /// `THINKTEST_LLM_API_KEY`
    pub llm_api_key: Option<String>,
    /// `THINKTEST_LLM_PROVIDER`
    pub llm_provider: Option<String>,
    /// `THINKTEST_LLM_MODEL`
    pub llm_model: Option<String>,
}

impl EnvOverrides {
    /// Snapshot of the relevant environment variables
    pub fn from_env() -> Self {
        Self {
            github_token: read_env("GITHUB_TOKEN"),
            github_api_base_url: read_env("GITHUB_API_BASE_URL"),
            database_url: read_env("THINKTEST_DATABASE_URL"),
            bind_addr: read_env("THINKTEST_BIND_ADDR"),
            llm_endpoint: read_env("THINKTEST_LLM_ENDPOINT"),
            llm_api_key: read_env("THINKTEST_LLM_API_KEY"),
            llm_provider: read_env("THINKTEST_LLM_PROVIDER"),
            llm_model: read_env("THINKTEST_LLM_MODEL"),
        }
    }
}

/// Applies environment overrides on top of a loaded configuration
pub fn apply_env_overrides(config: &mut Config, overrides: &EnvOverrides) {
    if let Some(token) = &overrides.github_token {
        debug!("Using GitHub token from environment");
        config.github.token = Some(token.clone());
    }
    if let Some(base) = &overrides.github_api_base_url {
        config.github.api_base_url = base.trim_end_matches('/').to_string();
    }
    if let Some(url) = &overrides.database_url {
        config.database.url = url.clone();
    }
    if let Some(addr) = &overrides.bind_addr {
        config.server.bind_addr = addr.clone();
    }
    if let Some(endpoint) = &overrides.llm_endpoint {
        config.llm.endpoint = Some(endpoint.clone());
    }
    if let Some(key) = &overrides.llm_api_key {
        config.llm.api_key = Some(key.clone());
    }
    if let Some(provider) = &overrides.llm_provider {
        config.llm.provider = provider.to_lowercase();
    }
    if let Some(model) = &overrides.llm_model {
        config.llm.model = model.clone();
    }
}

// Blank variables count as unset
fn read_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
