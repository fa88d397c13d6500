use std::io;
use std::time::Duration;

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::github::GitHubError;

/// Custom result type alias for the application
pub type Result<T> = std::result::Result<T, IngestError>;

/// Coarse classification every failure is folded into before it leaves the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or unsafe input; the caller has to fix it
    Validation,
    /// A size, file-count or request-budget ceiling was hit
    ResourceLimit,
    /// Repository, branch or file does not exist or is inaccessible
    NotFound,
    /// GitHub answered with something other than the API (HTML, redirect, auth failure)
    Provider,
    /// Network level failure talking to GitHub
    Transport,
    /// Anything else
    Internal,
}

/// Which ceiling a [`IngestError::ResourceLimit`] refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    /// Repository byte size ceiling
    RepositorySize,
    /// Number of ingestible files
    FileCount,
    /// Per-user request budget
    RateLimit,
    /// GitHub's own API budget for the service credential
    UpstreamRateLimit,
}

/// Errors that can occur while validating and ingesting a repository
#[derive(Debug, Error)]
pub enum IngestError {
    /// Input validation errors
    #[error("Validation error: {message}")]
    Validation {
        /// Human readable reason
        message: String,
        /// Request field the message belongs to, if any
        field: Option<&'static str>,
    },

    /// Size, file-count or rate ceilings
    #[error("{message}")]
    ResourceLimit {
        /// Human readable reason
        message: String,
        /// The ceiling that was hit
        limit: LimitKind,
        /// When the caller may try again; `None` means reduce scope instead
        retry_after: Option<Duration>,
    },

    /// Missing or inaccessible repository, branch or file
    #[error("Not found: {0}")]
    NotFound(String),

    /// GitHub credential or response-shape problems on our side
    #[error("GitHub provider error: {0}")]
    Provider(String),

    /// Network connectivity errors
    #[error("Network error: {0}")]
    Transport(String),

    /// Persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Test generation collaborator failures
    #[error("Generation error: {0}")]
    Generation(String),

    /// JSON parsing/serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("IO error: {0}")]
    IO(#[from] io::Error),

    /// General message errors
    #[error("{0}")]
    Message(String),
}

impl IngestError {
    /// Creates a new error with the specified message
    pub fn new(message: &str) -> Self {
        Self::Message(message.to_string())
    }

    /// Validation failure not tied to a particular request field
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Validation failure attributed to a request field
    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field),
        }
    }

    /// Per-user request budget exhausted
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::ResourceLimit {
            message: format!(
                "Too many requests. Please try again in {} seconds.",
                retry_after_secs(retry_after)
            ),
            limit: LimitKind::RateLimit,
            retry_after: Some(retry_after),
        }
    }

    /// Returns the classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::ResourceLimit { .. } => ErrorKind::ResourceLimit,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Provider(_) => ErrorKind::Provider,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Storage(_)
            | Self::Config(_)
            | Self::Generation(_)
            | Self::Json(_)
            | Self::IO(_)
            | Self::Message(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code surfaced to API clients
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::ResourceLimit { limit, .. } => match limit {
                LimitKind::RepositorySize => "repository_too_large",
                LimitKind::FileCount => "too_many_files",
                LimitKind::RateLimit => "rate_limit_exceeded",
                LimitKind::UpstreamRateLimit => "github_rate_limit_exceeded",
            },
            Self::NotFound(_) => "not_found",
            Self::Provider(_) => "provider_error",
            Self::Transport(_) => "transport_error",
            Self::Storage(_) => "storage_error",
            Self::Config(_) => "config_error",
            Self::Generation(_) => "generation_error",
            Self::Json(_) | Self::IO(_) | Self::Message(_) => "internal_error",
        }
    }

    /// HTTP status this error maps to
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::ResourceLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Transport => StatusCode::BAD_GATEWAY,
            ErrorKind::Provider | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Delay after which a retry is meaningful
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::ResourceLimit { retry_after, .. } => *retry_after,
            Self::Transport(_) => Some(Duration::from_secs(2)),
            _ => None,
        }
    }

    /// Whether a client may try again later
    ///
    /// Every resource ceiling counts: size and file-count limits are policy,
    /// not correctness failures, even though they carry no `retry_after`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceLimit { .. } | Self::Transport(_))
    }

    /// Checks if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
            || matches!(
                self,
                Self::ResourceLimit {
                    retry_after: Some(_),
                    ..
                }
            )
    }

    /// Message safe to show an end user. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation { message, .. } | Self::ResourceLimit { message, .. } => {
                message.clone()
            }
            Self::NotFound(what) => format!("{} was not found or is not accessible", what),
            Self::Provider(detail) => format!(
                "GitHub integration is misconfigured: {}. Please contact support.",
                detail
            ),
            Self::Transport(_) => {
                "Could not reach GitHub. Please try again in a moment.".to_string()
            }
            Self::Generation(_) => {
                "Test generation failed. Please try again or choose another provider.".to_string()
            }
            _ => "An unexpected error occurred while processing the repository".to_string(),
        }
    }
}

/// Whole seconds for a retry hint, never zero
pub fn retry_after_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}

impl From<GitHubError> for IngestError {
    fn from(err: GitHubError) -> Self {
        match err {
            GitHubError::NotFound(what) => Self::NotFound(what),
            GitHubError::RateLimited { .. } => {
                let retry_after = err.retry_after().unwrap_or(Duration::from_secs(60));
                Self::ResourceLimit {
                    message: format!(
                        "GitHub API rate limit reached. Please try again in {} seconds.",
                        retry_after_secs(retry_after)
                    ),
                    limit: LimitKind::UpstreamRateLimit,
                    retry_after: Some(retry_after),
                }
            }
            GitHubError::Auth(_) => Self::Provider("the GitHub token was rejected".to_string()),
            GitHubError::Redirect { status, .. } => Self::Provider(format!(
                "GitHub redirected the API request (HTTP {}), which usually means the token lacks access",
                status
            )),
            GitHubError::MalformedResponse(_) => Self::Provider(
                "GitHub returned a non-JSON page instead of an API response".to_string(),
            ),
            GitHubError::Api { status, .. } if status >= 500 => {
                Self::Transport(format!("GitHub is unavailable (HTTP {})", status))
            }
            GitHubError::Api { status, .. } => {
                Self::Provider(format!("GitHub API request failed with HTTP {}", status))
            }
            GitHubError::Transport(msg) => Self::Transport(msg),
        }
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_error_creation() {
        let error = IngestError::new("test error");
        assert!(matches!(error, IngestError::Message(_)));

        if let IngestError::Message(msg) = error {
            assert_eq!(msg, "test error");
        }
    }

    #[test]
    fn test_is_transient() {
        let transient = IngestError::Transport("connection timeout".into());
        let fatal = IngestError::validation("invalid input");

        assert!(transient.is_transient());
        assert!(!fatal.is_transient());
    }

    #[test]
    fn test_size_limit_is_retryable_429_without_delay() {
        let err = IngestError::ResourceLimit {
            message: "too big".into(),
            limit: LimitKind::RepositorySize,
            retry_after: None,
        };
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.error_code(), "repository_too_large");
        assert!(err.is_retryable());
        assert!(!err.is_transient());
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let err = IngestError::rate_limited(Duration::from_millis(12_300));
        assert_eq!(err.kind(), ErrorKind::ResourceLimit);
        assert_eq!(err.retry_after(), Some(Duration::from_millis(12_300)));
        assert!(err.public_message().contains("13 seconds"));
    }

    #[test]
    fn test_github_errors_are_classified() {
        let cases = vec![
            (GitHubError::NotFound("octocat/nope".into()), ErrorKind::NotFound),
            (GitHubError::Auth("bad credentials".into()), ErrorKind::Provider),
            (
                GitHubError::Redirect {
                    status: 302,
                    location: Some("https://github.com/login".into()),
                },
                ErrorKind::Provider,
            ),
            (GitHubError::MalformedResponse("<html>".into()), ErrorKind::Provider),
            (GitHubError::Transport("timed out".into()), ErrorKind::Transport),
            (GitHubError::api_error(503, "Service Unavailable"), ErrorKind::Transport),
            (GitHubError::api_error(422, "Validation Failed"), ErrorKind::Provider),
            (
                GitHubError::RateLimited {
                    reset_at: Some(Utc::now() + chrono::Duration::seconds(30)),
                },
                ErrorKind::ResourceLimit,
            ),
        ];

        for (github, expected) in cases {
            let err: IngestError = github.into();
            assert_eq!(err.kind(), expected, "{:?}", err);
        }
    }

    #[test]
    fn test_github_outage_is_retryable_bad_gateway() {
        let err: IngestError = GitHubError::api_error(503, "Service Unavailable").into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.is_retryable());
        assert!(err.retry_after().is_some());
        assert!(!err.public_message().contains("misconfigured"));
    }

    #[test]
    fn test_public_message_hides_internal_detail() {
        let err = IngestError::Storage("UNIQUE constraint failed: analysis_results.file_hash".into());
        assert!(!err.public_message().contains("UNIQUE"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_retry_after_secs_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::from_secs(59)), 59);
        assert_eq!(retry_after_secs(Duration::from_millis(59_001)), 60);
    }
}
