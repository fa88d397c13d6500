mod env_manager;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{IngestError, Result};

pub use env_manager::{apply_env_overrides, EnvOverrides};

/// Main configuration struct for the service
///
/// Every section has defaults, so a config file only needs the keys it
/// wants to change. Environment variables are layered on top by
/// [`Config::load`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// GitHub API access
    pub github: GitHubConfig,
    /// Resource ceilings enforced before any fetch or storage write
    pub limits: LimitsConfig,
    /// Per-user request budgets
    pub rate_limits: RateLimits,
    /// Branch and tree cache behavior
    pub cache: CacheConfig,
    /// Concurrency of the ingestion pipeline
    pub processing: ProcessingConfig,
    /// HTTP server settings
    pub server: ServerConfig,
    /// Persistence settings
    pub database: DatabaseConfig,
    /// Test generation provider settings
    pub llm: LlmConfig,
}

/// Settings for talking to the GitHub REST API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// Service credential used for every API call
    pub token: Option<String>,
    /// API root, overridable for GitHub Enterprise or tests
    pub api_base_url: String,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// User-Agent header sent with each request
    pub user_agent: String,
}

/// Resource ceilings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest repository accepted for processing
    pub max_repository_size_bytes: u64,
    /// Largest number of ingestible files
    pub max_file_count: usize,
    /// File extensions kept when flattening a tree
    pub allowed_extensions: Vec<String>,
}

/// Rate limit settings, both windows are enforced together
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimits {
    /// Requests allowed within the short window
    pub per_minute: u32,
    /// Length of the short window
    pub minute_window_secs: u64,
    /// Requests allowed within the global window
    pub global: u32,
    /// Length of the global window
    pub global_window_secs: u64,
}

/// Cache lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Freshness of cached branch lists
    pub branch_ttl_secs: u64,
    /// Freshness of cached trees
    pub tree_ttl_secs: u64,
    /// How long an expired entry is kept around as a fallback
    pub stale_retention_secs: u64,
    /// Interval of the background prune sweep
    pub sweep_interval_secs: u64,
}

/// Configuration for parallel processing operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Maximum number of concurrent file content fetches
    pub max_concurrent_fetches: usize,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the server binds to
    pub bind_addr: String,
}

/// Persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite connection string
    pub url: String,
}

/// Test generation provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible API root; without it tests are scaffolded offline
    pub endpoint: Option<String>,
    /// Bearer credential for the endpoint
    pub api_key: Option<String>,
    /// Provider name reported for tests produced by the endpoint
    pub provider: String,
    /// Model requested from the endpoint
    pub model: String,
    /// Request timeout for generation calls
    pub timeout_secs: u64,
    /// Provider names accepted from clients
    pub allowed_providers: Vec<String>,
    /// Test frameworks accepted from clients
    pub allowed_frameworks: Vec<String>,
}

impl Config {
    /// Loads configuration from the default config file location and the environment
    ///
    /// If the config file doesn't exist, the defaults are used.
    pub fn load() -> Result<Self> {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        apply_env_overrides(&mut config, &EnvOverrides::from_env());
        Ok(config)
    }

    /// Loads configuration from an explicit TOML file and the environment
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        apply_env_overrides(&mut config, &EnvOverrides::from_env());
        Ok(config)
    }

    /// Parses a TOML file without consulting the environment
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&content)
            .map_err(|e| IngestError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Location of the per-user config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("thinktest-ingest").join("config.toml"))
    }

    /// Checks the configuration for values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        self.ensure_tokens()?;

        Url::parse(&self.github.api_base_url)
            .map_err(|e| IngestError::Config(format!("Invalid GitHub API base URL: {}", e)))?;

        if let Some(endpoint) = &self.llm.endpoint {
            Url::parse(endpoint)
                .map_err(|e| IngestError::Config(format!("Invalid LLM endpoint: {}", e)))?;
        }

        if self.limits.max_file_count == 0 || self.limits.max_repository_size_bytes == 0 {
            return Err(IngestError::Config("Resource limits must be greater than zero".into()));
        }
        if self.rate_limits.per_minute == 0 || self.rate_limits.global == 0 {
            return Err(IngestError::Config("Rate limits must be greater than zero".into()));
        }
        if self.processing.max_concurrent_fetches == 0 {
            return Err(IngestError::Config(
                "max_concurrent_fetches must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Validates that configured tokens are not blank
    pub fn ensure_tokens(&self) -> Result<()> {
        if let Some(token) = &self.github.token {
            if token.trim().is_empty() {
                return Err(IngestError::Config("GitHub token is empty".into()));
            }
        }
        Ok(())
    }

    /// Retrieves the GitHub token from the configuration
    pub fn github_token(&self) -> Result<&str> {
        self.github
            .token
            .as_deref()
            .ok_or_else(|| IngestError::Config("GitHub token not configured".into()))
    }

    /// Per-request timeout for GitHub calls
    pub fn github_timeout(&self) -> Duration {
        Duration::from_secs(self.github.timeout_secs)
    }
}

impl CacheConfig {
    /// Freshness of cached branch lists
    pub fn branch_ttl(&self) -> Duration {
        Duration::from_secs(self.branch_ttl_secs)
    }

    /// Freshness of cached trees
    pub fn tree_ttl(&self) -> Duration {
        Duration::from_secs(self.tree_ttl_secs)
    }

    /// Retention of expired entries
    pub fn stale_retention(&self) -> Duration {
        Duration::from_secs(self.stale_retention_secs)
    }

    /// Sweep interval
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base_url: "https://api.github.com".to_string(),
            timeout_secs: 30,
            user_agent: format!("thinktest-ingest/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_repository_size_bytes: 50 * 1024 * 1024,
            max_file_count: 1000,
            allowed_extensions: [
                "php", "js", "jsx", "ts", "tsx", "css", "scss", "json", "txt", "md", "xml",
                "yml", "yaml", "html", "htm", "pot", "po",
            ]
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
        }
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            per_minute: 30,
            minute_window_secs: 60,
            global: 500,
            global_window_secs: 3600,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            branch_ttl_secs: 300,
            tree_ttl_secs: 600,
            stale_retention_secs: 24 * 3600,
            sweep_interval_secs: 300,
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 8,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:./thinktest.db".to_string(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 120,
            allowed_providers: vec![
                "openai".to_string(),
                "anthropic".to_string(),
                "chatgpt-5".to_string(),
                "claude".to_string(),
            ],
            allowed_frameworks: vec!["phpunit".to_string(), "pest".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.limits.max_repository_size_bytes, 52_428_800);
        assert_eq!(config.limits.max_file_count, 1000);
    }

    #[test]
    fn test_github_token() -> Result<()> {
        let config = Config::default();
        assert!(config.github_token().is_err());

        let mut config = Config::default();
        config.github.token = Some("test_token".to_string());
        assert_eq!(config.github_token()?, "test_token");

        Ok(())
    }

    #[test]
    fn test_blank_token_is_rejected() {
        let mut config = Config::default();
        config.github.token = Some("   ".to_string());
        assert!(matches!(config.validate(), Err(IngestError::Config(_))));
    }

    #[test]
    fn test_partial_file_keeps_defaults() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            "[rate_limits]\nper_minute = 5\n\n[github]\napi_base_url = \"http://127.0.0.1:9999\""
        )?;

        let config = Config::from_file(file.path())?;
        assert_eq!(config.rate_limits.per_minute, 5);
        assert_eq!(config.rate_limits.global, 500);
        assert_eq!(config.github.api_base_url, "http://127.0.0.1:9999");
        assert_eq!(config.github.timeout_secs, 30);
        Ok(())
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = Config::default();
        config.github.api_base_url = "not a url".into();
        assert!(config.validate().is_err());
    }
}
