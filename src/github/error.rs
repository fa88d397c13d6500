//! Normalized outcomes of a failed GitHub API call.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced by [`super::GitHubClient`]
#[derive(Debug, Error)]
pub enum GitHubError {
    /// Repository, branch or path does not exist or the token cannot see it
    #[error("Not found: {0}")]
    NotFound(String),

    /// GitHub's API budget for the service credential is exhausted
    #[error("GitHub API rate limit exceeded")]
    RateLimited {
        /// When GitHub says the budget resets
        reset_at: Option<DateTime<Utc>>,
    },

    /// Credential rejected or lacking permission
    #[error("GitHub authentication failed: {0}")]
    Auth(String),

    /// The API answered with a redirect instead of a resource
    #[error("GitHub returned an unexpected redirect (HTTP {status})")]
    Redirect {
        /// Redirect status code
        status: u16,
        /// `Location` header, if any
        location: Option<String>,
    },

    /// HTML or otherwise undecodable body where JSON was expected
    #[error("GitHub returned a malformed response: {0}")]
    MalformedResponse(String),

    /// Any other non-success status
    #[error("GitHub API error: {status} - {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// `message` field of the error body, or the status text
        message: String,
    },

    /// Timeout, refused connection, DNS failure
    #[error("Network error: {0}")]
    Transport(String),
}

impl GitHubError {
    /// Create an API error from status code and message.
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Time until a rate-limited call is worth repeating
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { reset_at } => Some(
                reset_at
                    .map(|reset| (reset - Utc::now()).to_std().unwrap_or(Duration::from_secs(1)))
                    .unwrap_or(Duration::from_secs(60)),
            ),
            _ => None,
        }
    }

    /// GitHub itself failed (HTTP 5xx)
    pub fn is_upstream_outage(&self) -> bool {
        matches!(self, Self::Api { status, .. } if *status >= 500)
    }

    /// Failure tied to one path rather than to the credential or GitHub itself
    pub fn is_path_specific(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::MalformedResponse(_))
    }

    /// Whether the same call may succeed later without changes
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transport(_)) || self.is_upstream_outage()
    }
}

impl From<reqwest::Error> for GitHubError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transport("request to GitHub timed out".to_string())
        } else if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_rate_limited() {
        assert!(GitHubError::RateLimited { reset_at: None }.is_retryable());
        assert!(GitHubError::Transport("refused".into()).is_retryable());
    }

    #[test]
    fn test_not_retryable_provider_errors() {
        assert!(!GitHubError::Auth("Bad credentials".into()).is_retryable());
        assert!(!GitHubError::api_error(422, "Validation Failed").is_retryable());
        assert!(!GitHubError::MalformedResponse("<html>".into()).is_retryable());
    }

    #[test]
    fn test_server_errors_are_outages() {
        let err = GitHubError::api_error(503, "Service Unavailable");
        assert!(err.is_upstream_outage());
        assert!(err.is_retryable());
        assert!(!GitHubError::api_error(409, "Git Repository is empty.").is_upstream_outage());
    }

    #[test]
    fn test_only_missing_or_undecodable_files_are_path_specific() {
        assert!(GitHubError::NotFound("a.php".into()).is_path_specific());
        assert!(GitHubError::MalformedResponse("invalid base64".into()).is_path_specific());
        assert!(!GitHubError::RateLimited { reset_at: None }.is_path_specific());
        assert!(!GitHubError::Auth("Bad credentials".into()).is_path_specific());
        assert!(!GitHubError::Transport("timed out".into()).is_path_specific());
    }

    #[test]
    fn test_retry_after_uses_reset_time() {
        let err = GitHubError::RateLimited {
            reset_at: Some(Utc::now() + chrono::Duration::seconds(90)),
        };
        let wait = err.retry_after().unwrap();
        assert!(wait > Duration::from_secs(80) && wait <= Duration::from_secs(90));
    }

    #[test]
    fn test_retry_after_past_reset_is_short() {
        let err = GitHubError::RateLimited {
            reset_at: Some(Utc::now() - chrono::Duration::seconds(5)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(1)));
    }
}
