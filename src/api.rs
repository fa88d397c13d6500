//! HTTP surface of the ingestion pipeline.
//!
//! Every handler authenticates through [`AuthenticatedUser`], validates and
//! rate-limits before touching GitHub, and reports failures through
//! [`ApiError`] so the status code and body shape are the same everywhere.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::{AnalysisService, PatternAnalyzer};
use crate::cache::{CacheStatus, GitHubCache};
use crate::config::Config;
use crate::error::{retry_after_secs, IngestError, Result};
use crate::generation::{generator_from_config, GenerationOptions, TestGenerator};
use crate::github::{GitHubClient, RepositoryReference};
use crate::orchestrator::RepositoryOrchestrator;
use crate::rate_limiter::RateLimiter;
use crate::store::{NewAnalysis, RepositoryStore, SqliteStore};
use crate::validation::ValidationService;

/// Header set by the upstream authenticator
pub const USER_ID_HEADER: &str = "x-user-id";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub validation: Arc<ValidationService>,
    pub github: Arc<GitHubCache>,
    pub orchestrator: Arc<RepositoryOrchestrator>,
    pub store: Arc<dyn RepositoryStore>,
    pub analyzer: Arc<dyn AnalysisService>,
    pub generator: Arc<dyn TestGenerator>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wires every collaborator from the configuration around an existing store
    pub fn new(config: Config, store: Arc<dyn RepositoryStore>) -> Result<Self> {
        let client = GitHubClient::new(&config)?;
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limits));
        let validation = Arc::new(ValidationService::new(config.limits.clone(), rate_limiter));
        let github = Arc::new(GitHubCache::new(client.clone(), &config.cache));
        let orchestrator = Arc::new(RepositoryOrchestrator::new(
            client,
            Arc::clone(&store),
            Arc::clone(&validation),
            &config.processing,
        ));
        let generator = generator_from_config(&config.llm)?;

        Ok(Self {
            config: Arc::new(config),
            validation,
            github,
            orchestrator,
            store,
            analyzer: Arc::new(PatternAnalyzer::new()),
            generator,
            started_at: Utc::now(),
        })
    }

    /// Opens the configured database and wires the state around it
    pub async fn from_config(config: Config) -> Result<Self> {
        let store = SqliteStore::connect(&config.database.url).await?;
        Self::new(config, Arc::new(store))
    }

    /// Replaces the test generator
    pub fn with_generator(mut self, generator: Arc<dyn TestGenerator>) -> Self {
        self.generator = generator;
        self
    }
}

/// Builds the router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/thinktest/github/validate", post(validate_repository))
        .route("/thinktest/github/branches", post(list_branches))
        .route("/thinktest/github/tree", post(repository_tree))
        .route("/thinktest/github/file", post(file_content))
        .route("/thinktest/github/process", post(process_repository))
        .route("/thinktest/github/diagnostics/token", get(token_diagnostics))
        .route(
            "/thinktest/github/diagnostics/rate-limit",
            get(rate_limit_diagnostics),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors and authentication
// ---------------------------------------------------------------------------

/// Failure of a request, rendered with the uniform error body
#[derive(Debug)]
pub enum ApiError {
    /// Missing or malformed `X-User-Id`
    Unauthenticated,
    /// Anything raised by the pipeline
    Ingest(IngestError),
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        Self::Ingest(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            Self::Unauthenticated => {
                let body = json!({
                    "success": false,
                    "message": "Authentication required",
                    "error_code": "unauthenticated",
                    "retry_possible": false,
                });
                return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
            }
            Self::Ingest(err) => err,
        };

        let status = err.status_code();
        if status.is_server_error() {
            warn!("Request failed with {}: {}", status, err);
        }

        let mut body = json!({
            "success": false,
            "message": err.public_message(),
            "error_code": err.error_code(),
            "retry_possible": err.is_retryable(),
        });
        let retry_after = err.retry_after().map(retry_after_secs);
        if let Some(secs) = retry_after {
            body["retry_after"] = json!(secs);
        }
        if let IngestError::Validation { message, field } = &err {
            let mut errors = Map::new();
            errors.insert(field.unwrap_or("request").to_string(), json!([message]));
            body["errors"] = Value::Object(errors);
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after.filter(|_| status == StatusCode::TOO_MANY_REQUESTS) {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Caller identity established by the upstream authenticator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub i64);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> ApiResult<Self> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(AuthenticatedUser)
            .ok_or(ApiError::Unauthenticated)
    }
}

fn body<T: DeserializeOwned>(payload: std::result::Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| IngestError::validation(rejection.body_text()).into())
}

// ---------------------------------------------------------------------------
// Request and response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ValidateRequest {
    pub repository_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RepositoryRequest {
    pub owner: String,
    pub repo: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TreeRequest {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub recursive: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileRequest {
    pub owner: String,
    pub repo: String,
    pub path: String,
    pub branch: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProcessRequest {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub provider: String,
    pub framework: String,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service name
    pub service: String,
    /// Service version
    pub version: String,
    /// Health status
    pub status: String,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
    /// Uptime in seconds
    pub uptime: u64,
}

fn cache_fields(status: &CacheStatus) -> (bool, Option<u64>, Option<&'static str>) {
    (
        status.is_cached(),
        status.age().map(|age| age.as_secs()),
        status.message(),
    )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

impl AppState {
    fn checked_reference(&self, owner: &str, repo: &str, user_id: i64) -> Result<RepositoryReference> {
        let reference = RepositoryReference::new(owner.trim(), repo.trim());
        let raw_input = format!("{}/{}", owner, repo);
        self.validation
            .validate_repository_components(&reference, &raw_input, user_id)?;
        Ok(reference)
    }

    fn checked_options(&self, provider: &str, framework: &str) -> Result<GenerationOptions> {
        let provider = provider.trim().to_lowercase();
        let framework = framework.trim().to_lowercase();
        let llm = &self.config.llm;

        if !llm.allowed_providers.contains(&provider) {
            return Err(IngestError::invalid_field(
                "provider",
                format!("Unsupported AI provider '{}'", provider),
            ));
        }
        if !llm.allowed_frameworks.contains(&framework) {
            return Err(IngestError::invalid_field(
                "framework",
                format!("Unsupported test framework '{}'", framework),
            ));
        }
        Ok(GenerationOptions { provider, framework })
    }
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let now = Utc::now();
    Json(HealthResponse {
        service: "thinktest-ingest".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "healthy".to_string(),
        timestamp: now,
        uptime: u64::try_from((now - state.started_at).num_seconds()).unwrap_or(0),
    })
}

async fn validate_repository(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    payload: std::result::Result<Json<ValidateRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request = body(payload)?;
    let reference = state
        .validation
        .validate_repository_url(&request.repository_url, user_id)?;
    state.validation.validate_rate_limit(user_id).await?;

    let info = state
        .github
        .client()
        .get_repository_info(&reference.owner, &reference.repo)
        .await
        .map_err(IngestError::from)?;

    info!("User {} validated {}", user_id, reference.full_name);
    Ok(Json(json!({
        "success": true,
        "repository": {
            "owner": reference.owner,
            "repo": reference.repo,
            "full_name": reference.full_name,
            "url": reference.url,
            "default_branch": info.default_branch,
            "description": info.description,
            "private": info.private,
            "size": info.size_bytes(),
            "language": info.language,
            "updated_at": info.updated_at,
        }
    })))
}

async fn list_branches(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    payload: std::result::Result<Json<RepositoryRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request = body(payload)?;
    let reference = state.checked_reference(&request.owner, &request.repo, user_id)?;
    state.validation.validate_rate_limit(user_id).await?;

    let branches = state
        .github
        .branches(&reference.owner, &reference.repo)
        .await
        .map_err(IngestError::from)?;
    let (cached, cache_age, message) = cache_fields(&branches.status);

    Ok(Json(json!({
        "success": true,
        "branches": branches.value,
        "cached": cached,
        "cache_age": cache_age,
        "message": message,
    })))
}

async fn repository_tree(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    payload: std::result::Result<Json<TreeRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request = body(payload)?;
    let reference = state.checked_reference(&request.owner, &request.repo, user_id)?;
    state.validation.validate_branch_name(&request.branch)?;
    state.validation.validate_rate_limit(user_id).await?;

    let tree = state
        .github
        .tree(&reference.owner, &reference.repo, &request.branch, request.recursive)
        .await
        .map_err(IngestError::from)?;
    let (cached, cache_age, message) = cache_fields(&tree.status);

    Ok(Json(json!({
        "success": true,
        "tree": tree.value,
        "cached": cached,
        "cache_age": cache_age,
        "message": message,
    })))
}

async fn file_content(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    payload: std::result::Result<Json<FileRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request = body(payload)?;
    let reference = state.checked_reference(&request.owner, &request.repo, user_id)?;
    state.validation.validate_branch_name(&request.branch)?;
    state.validation.validate_file_path(&request.path, user_id)?;
    state.validation.validate_rate_limit(user_id).await?;

    let mut file = state
        .github
        .client()
        .get_file_content(&reference.owner, &reference.repo, &request.path, &request.branch)
        .await
        .map_err(IngestError::from)?;
    file.content = state.validation.sanitize_file_content(&file.content);

    Ok(Json(json!({ "success": true, "file": file })))
}

async fn process_repository(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    payload: std::result::Result<Json<ProcessRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request = body(payload)?;
    let reference = state.checked_reference(&request.owner, &request.repo, user_id)?;
    state.validation.validate_branch_name(&request.branch)?;
    let options = state.checked_options(&request.provider, &request.framework)?;
    state.validation.validate_rate_limit(user_id).await?;

    let outcome = state
        .orchestrator
        .process(user_id, &reference, &request.branch)
        .await?;

    let report = state
        .analyzer
        .analyze(&outcome.content, &reference.full_name)
        .await?;
    let (analysis, created) = state
        .store
        .upsert_analysis(&NewAnalysis {
            user_id,
            filename: format!("{}@{}", reference.full_name, request.branch),
            file_hash: outcome.content_hash.clone(),
            analysis_data: serde_json::to_value(&report).map_err(IngestError::from)?,
            provider: options.provider.clone(),
            framework: options.framework.clone(),
        })
        .await?;
    if !created {
        info!(
            "Content of {}@{} unchanged, updated analysis {}",
            reference.full_name, request.branch, analysis.id
        );
    }

    let generated = state.generator.generate(&outcome.content, &options).await?;

    Ok(Json(json!({
        "success": true,
        "conversation_id": Uuid::new_v4().to_string(),
        "analysis": report,
        "analysis_id": analysis.id,
        "repository": outcome.record,
        "tests": generated.tests,
        "metadata": {
            "provider": generated.provider,
            "model": generated.model,
            "framework": options.framework,
            "content_hash": outcome.content_hash,
            "files_processed": outcome.files_processed,
            "files_skipped": outcome.files_skipped,
        }
    })))
}

async fn token_diagnostics(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let status = state
        .github
        .client()
        .verify_api_token()
        .await
        .map_err(IngestError::from)?;
    Ok(Json(json!({ "success": true, "token": status })))
}

async fn rate_limit_diagnostics(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let info = state
        .github
        .client()
        .get_rate_limit_info()
        .await
        .map_err(IngestError::from)?;
    Ok(Json(json!({ "success": true, "rate_limit": info })))
}
