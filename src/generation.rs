use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::analysis::PatternAnalyzer;
use crate::config::LlmConfig;
use crate::error::{IngestError, Result};

// Upper bound on source text sent in one prompt.
const MAX_PROMPT_CHARS: usize = 120_000;

/// Provider and framework requested by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// AI provider name, e.g. `openai`
    pub provider: String,
    /// Test framework, `phpunit` or `pest`
    pub framework: String,
}

/// Generated test source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedTests {
    /// Test file content
    pub tests: String,
    /// Provider that produced the tests
    pub provider: String,
    /// Model that produced the tests
    pub model: String,
}

/// Test generation collaborator
#[async_trait]
pub trait TestGenerator: Send + Sync {
    /// Generates tests for an aggregated plugin payload
    async fn generate(&self, content: &str, options: &GenerationOptions) -> Result<GeneratedTests>;
}

/// Picks the HTTP generator when an endpoint is configured, the offline scaffold otherwise
pub fn generator_from_config(config: &LlmConfig) -> Result<Arc<dyn TestGenerator>> {
    match &config.endpoint {
        Some(_) => Ok(Arc::new(ChatCompletionGenerator::new(config)?)),
        None => {
            info!("No LLM endpoint configured, tests will be scaffolded offline");
            Ok(Arc::new(ScaffoldGenerator::new()))
        }
    }
}

/// Client for OpenAI-compatible `/chat/completions` endpoints
///
/// One endpoint serves every request, so the reported provider is the
/// configured one, whatever the client asked for.
pub struct ChatCompletionGenerator {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    provider: String,
    model: String,
}

impl ChatCompletionGenerator {
    /// Builds the client; the endpoint must be configured
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let base_url = config
            .endpoint
            .clone()
            .ok_or_else(|| IngestError::Config("LLM endpoint not configured".into()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IngestError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            provider: config.provider.clone(),
            model: config.model.clone(),
        })
    }

    fn system_prompt(framework: &str) -> String {
        let style = match framework {
            "pest" => "Pest (it()/expect() syntax)",
            _ => "PHPUnit with WP_UnitTestCase",
        };
        format!(
            "You are an expert WordPress plugin engineer. Write thorough unit tests using {}. \
             The user message contains the plugin source; each file starts with a \
             `// ===== File: path =====` marker. Reply with PHP test code only.",
            style
        )
    }
}

#[async_trait]
impl TestGenerator for ChatCompletionGenerator {
    async fn generate(&self, content: &str, options: &GenerationOptions) -> Result<GeneratedTests> {
        if options.provider != self.provider {
            warn!(
                "Provider {} requested, serving it from the configured {} endpoint",
                options.provider, self.provider
            );
        }
        info!(
            "Requesting {} tests from {} ({})",
            options.framework, self.provider, self.model
        );

        let source: String = content.chars().take(MAX_PROMPT_CHARS).collect();
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&json!({
                "model": self.model,
                "temperature": 0.2,
                "messages": [{
                    "role": "system",
                    "content": Self::system_prompt(&options.framework)
                }, {
                    "role": "user",
                    "content": source
                }]
            }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| IngestError::Generation(e.to_string()))?;

        if !response.status().is_success() {
            warn!("Test generation failed with HTTP {}", response.status());
            return Err(IngestError::Generation(format!(
                "Failed to generate tests: HTTP {}",
                response.status()
            )));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| IngestError::Generation(e.to_string()))?;

        let tests = result["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| IngestError::Generation("Invalid completion response format".into()))?;
        let model = result["model"].as_str().unwrap_or(&self.model);

        Ok(GeneratedTests {
            tests: strip_code_fence(tests),
            provider: self.provider.clone(),
            model: model.to_string(),
        })
    }
}

fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let body = rest.split_once('\n').map_or("", |(_, body)| body);
            body.trim_end().trim_end_matches("```").trim_end().to_string()
        }
        None => trimmed.to_string(),
    }
}

/// Offline generator producing test skeletons from the declared symbols
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaffoldGenerator {
    analyzer: PatternAnalyzer,
}

impl ScaffoldGenerator {
    /// Creates the generator
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TestGenerator for ScaffoldGenerator {
    async fn generate(&self, content: &str, options: &GenerationOptions) -> Result<GeneratedTests> {
        let report = self.analyzer.scan(content, "");
        let mut out = String::from("<?php\n");

        if options.framework == "pest" {
            for function in &report.functions {
                out.push_str(&format!(
                    "\nit('defines {0}', function () {{\n    expect(function_exists('{0}'))->toBeTrue();\n}});\n",
                    function
                ));
            }
            for class in &report.classes {
                out.push_str(&format!(
                    "\nit('declares {0}', function () {{\n    expect(class_exists('{0}'))->toBeTrue();\n}});\n",
                    class
                ));
            }
        } else {
            out.push_str("\nclass PluginScaffoldTest extends WP_UnitTestCase {\n");
            for function in &report.functions {
                out.push_str(&format!(
                    "\n    public function test_{0}_exists() {{\n        $this->assertTrue( function_exists( '{0}' ) );\n    }}\n",
                    function
                ));
            }
            for class in &report.classes {
                out.push_str(&format!(
                    "\n    public function test_{0}_class_exists() {{\n        $this->assertTrue( class_exists( '{0}' ) );\n    }}\n",
                    class
                ));
            }
            out.push_str("}\n");
        }

        Ok(GeneratedTests {
            tests: out,
            provider: "scaffold".to_string(),
            model: "scaffold".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn options(framework: &str) -> GenerationOptions {
        GenerationOptions {
            provider: "openai".into(),
            framework: framework.into(),
        }
    }

    #[tokio::test]
    async fn test_chat_completion_generator() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"model": "gpt-4o-mini-2024", "choices": [{"message": {"role": "assistant",
                    "content": "```php\n<?php\nclass HelloTest extends WP_UnitTestCase {}\n```"}}]}"#,
            )
            .create_async()
            .await;

        let config = LlmConfig {
            endpoint: Some(format!("{}/v1/", server.url())),
            api_key: Some("sk-test".into()),
            ..LlmConfig::default()
        };
        let generated = ChatCompletionGenerator::new(&config)
            .unwrap()
            .generate("<?php function hello() {}", &options("phpunit"))
            .await
            .unwrap();

        assert_eq!(generated.tests, "<?php\nclass HelloTest extends WP_UnitTestCase {}");
        assert_eq!(generated.model, "gpt-4o-mini-2024");
        assert_eq!(generated.provider, "openai");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_reports_configured_provider() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices": [{"message": {"content": "<?php"}}]}"#)
            .create_async()
            .await;

        let config = LlmConfig {
            endpoint: Some(server.url()),
            provider: "anthropic".into(),
            model: "claude-sonnet".into(),
            ..LlmConfig::default()
        };
        let generated = ChatCompletionGenerator::new(&config)
            .unwrap()
            .generate("<?php", &options("phpunit"))
            .await
            .unwrap();
        assert_eq!(generated.provider, "anthropic");
        assert_eq!(generated.model, "claude-sonnet");
    }

    #[tokio::test]
    async fn test_chat_completion_http_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .create_async()
            .await;

        let config = LlmConfig {
            endpoint: Some(server.url()),
            ..LlmConfig::default()
        };
        let err = ChatCompletionGenerator::new(&config)
            .unwrap()
            .generate("<?php", &options("pest"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Generation(_)));
    }

    #[tokio::test]
    async fn test_scaffold_phpunit() {
        let generated = ScaffoldGenerator::new()
            .generate("<?php\nfunction hello_dolly() {}\nclass Dolly {}", &options("phpunit"))
            .await
            .unwrap();
        assert!(generated.tests.contains("extends WP_UnitTestCase"));
        assert!(generated.tests.contains("function_exists( 'hello_dolly' )"));
        assert!(generated.tests.contains("class_exists( 'Dolly' )"));
        assert_eq!(generated.model, "scaffold");
        assert_eq!(generated.provider, "scaffold");
    }

    #[tokio::test]
    async fn test_scaffold_pest() {
        let generated = ScaffoldGenerator::new()
            .generate("<?php\nfunction hello_dolly() {}", &options("pest"))
            .await
            .unwrap();
        assert!(generated.tests.contains("it('defines hello_dolly'"));
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("plain"), "plain");
        assert_eq!(strip_code_fence("```php\n<?php\n```"), "<?php");
    }
}
