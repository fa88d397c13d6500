//! Input validation and resource ceilings.
//!
//! Everything a user can type passes through [`ValidationService`] before a
//! network call or a storage write happens. Violations that look like
//! crafted input are reported on the [`SECURITY_TARGET`] tracing target.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::warn;
use url::Url;

use crate::config::LimitsConfig;
use crate::error::{IngestError, LimitKind, Result};
use crate::github::RepositoryReference;
use crate::logging::SECURITY_TARGET;
use crate::rate_limiter::{RateLimitDecision, RateLimiter};

/// Longest accepted repository URL
pub const MAX_URL_LENGTH: usize = 500;
/// Longest accepted owner or repository name
pub const MAX_NAME_LENGTH: usize = 100;
/// Longest accepted branch name
pub const MAX_BRANCH_LENGTH: usize = 250;
/// Longest accepted file path
pub const MAX_PATH_LENGTH: usize = 1000;

const RESERVED_NAMES: &[&str] = &[
    "about",
    "admin",
    "api",
    "dashboard",
    "enterprise",
    "explore",
    "features",
    "gist",
    "github",
    "issues",
    "login",
    "logout",
    "marketplace",
    "notifications",
    "organizations",
    "orgs",
    "pricing",
    "pulls",
    "raw",
    "settings",
    "signup",
    "sponsors",
    "topics",
    "trending",
    "www",
];

const SMUGGLED_SCHEMES: &[&str] = &["javascript:", "data:", "file:", "vbscript:"];

static NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("static regex"));
static BRANCH_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._/-]+$").expect("static regex"));
static SSH_FORM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^git@github\.com:([^/]+)/([^/]+?)(?:\.git)?/?$").expect("static regex")
});
static BARE_FORM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^/:@]+)/([^/:@]+?)(?:\.git)?/?$").expect("static regex"));

/// Checks an owner or repository name without logging
pub fn check_repository_name(value: &str, field: &'static str) -> Result<()> {
    let label = if field == "owner" { "Owner" } else { "Repository name" };

    if value.is_empty() {
        return Err(IngestError::invalid_field(field, format!("{} is required", label)));
    }
    if value.chars().count() > MAX_NAME_LENGTH {
        return Err(IngestError::invalid_field(
            field,
            format!("{} must be at most {} characters", label, MAX_NAME_LENGTH),
        ));
    }
    if !NAME_CHARS.is_match(value) {
        return Err(IngestError::invalid_field(
            field,
            format!(
                "{} may only contain letters, digits, hyphens, underscores and dots",
                label
            ),
        ));
    }
    if RESERVED_NAMES.contains(&value.to_lowercase().as_str()) {
        return Err(IngestError::invalid_field(
            field,
            format!("{} '{}' is reserved", label, value),
        ));
    }

    let is_separator = |c: char| matches!(c, '-' | '_' | '.');
    if value.starts_with(is_separator) || value.ends_with(is_separator) {
        return Err(IngestError::invalid_field(
            field,
            format!("{} cannot start or end with a separator", label),
        ));
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.windows(2).any(|w| is_separator(w[0]) && is_separator(w[1])) {
        return Err(IngestError::invalid_field(
            field,
            format!("{} cannot contain consecutive separators", label),
        ));
    }
    Ok(())
}

/// Checks a branch name without logging
pub fn check_branch_name(name: &str) -> Result<()> {
    let invalid = |message: &str| Err(IngestError::invalid_field("branch", message));

    if name.is_empty() {
        return invalid("Branch name is required");
    }
    if name.chars().count() > MAX_BRANCH_LENGTH {
        return invalid("Branch name must be at most 250 characters");
    }
    if !BRANCH_CHARS.is_match(name) {
        return invalid(
            "Branch name may only contain letters, digits, dots, hyphens, underscores and slashes",
        );
    }
    if name.starts_with('.') || name.starts_with('/') {
        return invalid("Branch name cannot start with a dot or slash");
    }
    if name.ends_with('/') || name.ends_with('.') {
        return invalid("Branch name cannot end with a slash or dot");
    }
    if name.contains("..") || name.contains("//") || name.contains("@{") {
        return invalid("Branch name contains an invalid sequence");
    }
    if name.ends_with(".lock") || name.split('/').any(|part| part.starts_with('.')) {
        return invalid("Branch name is not a valid git reference");
    }
    Ok(())
}

/// Checks a repository-relative file path without logging
pub fn check_file_path(path: &str) -> Result<()> {
    let invalid = |message: &str| Err(IngestError::invalid_field("path", message));

    if path.is_empty() {
        return invalid("File path is required");
    }
    if path.chars().count() > MAX_PATH_LENGTH {
        return invalid("File path must be at most 1000 characters");
    }
    if path.contains('\0') || path.chars().any(char::is_control) {
        return invalid("File path contains control characters");
    }
    if path.contains('\\') {
        return invalid("File path cannot contain backslashes");
    }
    if path.starts_with('/') || path.starts_with('~') {
        return invalid("File path must be relative to the repository root");
    }
    if has_encoded_traversal(path) {
        return invalid("File path cannot contain encoded characters");
    }
    if path.split('/').any(|segment| segment == ".." || segment == ".") {
        return invalid("File path cannot contain traversal segments");
    }
    Ok(())
}

/// Removes NUL, DEL and non-whitespace C0 control characters
pub fn sanitize_file_content(content: &str) -> String {
    content
        .chars()
        .filter(|&c| matches!(c, '\t' | '\n' | '\r') || !(c.is_ascii_control()))
        .collect()
}

fn has_encoded_traversal(value: &str) -> bool {
    let lower = value.to_lowercase();
    ["%2e", "%2f", "%5c", "%00", "%25"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Validation entry point holding the policy the checks enforce
pub struct ValidationService {
    limits: LimitsConfig,
    rate_limiter: Arc<RateLimiter>,
}

impl ValidationService {
    /// Creates a service enforcing `limits` and consulting `rate_limiter`
    pub fn new(limits: LimitsConfig, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            limits,
            rate_limiter,
        }
    }

    /// Configured ceilings
    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Request budget shared with this service
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Parses and validates a user supplied repository URL
    ///
    /// Accepts `https://github.com/owner/repo[.git][/...]`, `http://` and
    /// `www.` variants, `git@github.com:owner/repo.git` and bare
    /// `owner/repo`.
    pub fn validate_repository_url(&self, url: &str, user_id: i64) -> Result<RepositoryReference> {
        let input = url.trim();
        let field = "repository_url";

        if input.is_empty() {
            return Err(IngestError::invalid_field(field, "Repository URL is required"));
        }
        if input.chars().count() > MAX_URL_LENGTH {
            return Err(IngestError::invalid_field(
                field,
                format!("Repository URL must be at most {} characters", MAX_URL_LENGTH),
            ));
        }
        if input.chars().any(|c| c.is_control() || c.is_whitespace()) {
            self.log_security_event(
                "control_characters_in_url",
                json!({ "raw_input": input, "user_id": user_id }),
            );
            return Err(IngestError::invalid_field(
                field,
                "Repository URL contains invalid characters",
            ));
        }

        let lower = input.to_lowercase();
        if SMUGGLED_SCHEMES.iter().any(|scheme| lower.starts_with(scheme)) {
            self.log_security_event(
                "scheme_smuggling",
                json!({ "raw_input": input, "user_id": user_id }),
            );
            return Err(IngestError::invalid_field(field, "Unsupported URL scheme"));
        }
        if has_encoded_traversal(input) || input.contains("..") {
            self.log_security_event(
                "encoded_traversal",
                json!({ "raw_input": input, "user_id": user_id }),
            );
            return Err(IngestError::invalid_field(
                field,
                "Repository URL contains a path traversal sequence",
            ));
        }

        let (owner, repo) = if let Some(caps) = SSH_FORM.captures(input) {
            (caps[1].to_string(), caps[2].to_string())
        } else if lower.starts_with("https://") || lower.starts_with("http://") {
            self.parse_http_url(input, user_id)?
        } else if lower.starts_with("github.com/") || lower.starts_with("www.github.com/") {
            self.parse_http_url(&format!("https://{}", input), user_id)?
        } else if let Some(caps) = BARE_FORM.captures(input) {
            (caps[1].to_string(), caps[2].to_string())
        } else if input.contains("://") || input.contains(':') {
            self.log_security_event(
                "unsupported_scheme",
                json!({ "raw_input": input, "user_id": user_id }),
            );
            return Err(IngestError::invalid_field(field, "Unsupported URL scheme"));
        } else {
            return Err(IngestError::invalid_field(
                field,
                "Repository URL must include both owner and repository name",
            ));
        };

        let reference = RepositoryReference::new(&owner, &repo);
        self.validate_repository_components(&reference, input, user_id)?;
        Ok(reference)
    }

    fn parse_http_url(&self, input: &str, user_id: i64) -> Result<(String, String)> {
        let field = "repository_url";
        let parsed = Url::parse(input)
            .map_err(|_| IngestError::invalid_field(field, "Repository URL is malformed"))?;

        let host = parsed.host_str().unwrap_or("").to_lowercase();
        let has_credentials = !parsed.username().is_empty() || parsed.password().is_some();
        let github_host = matches!(host.as_str(), "github.com" | "www.github.com");
        if has_credentials || parsed.port().is_some() || !github_host {
            self.log_security_event(
                "non_github_host",
                json!({
                    "raw_input": input,
                    "host": host,
                    "has_credentials": has_credentials,
                    "user_id": user_id,
                }),
            );
            return Err(IngestError::invalid_field(
                field,
                "Only github.com repository URLs are supported",
            ));
        }

        let mut segments = parsed
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter();
        match (segments.next(), segments.next()) {
            (Some(owner), Some(repo)) => {
                let repo = repo.strip_suffix(".git").unwrap_or(repo);
                Ok((owner.to_string(), repo.to_string()))
            }
            _ => Err(IngestError::invalid_field(
                field,
                "Repository URL must include both owner and repository name",
            )),
        }
    }

    /// Enforces the owner and repository naming rules
    ///
    /// Every violation is reported as a security event with the raw input.
    pub fn validate_repository_components(
        &self,
        reference: &RepositoryReference,
        raw_input: &str,
        user_id: i64,
    ) -> Result<()> {
        let result = check_repository_name(&reference.owner, "owner")
            .and_then(|()| check_repository_name(&reference.repo, "repo"));

        if let Err(err) = &result {
            self.log_security_event(
                "invalid_repository_components",
                json!({
                    "owner": reference.owner,
                    "repo": reference.repo,
                    "raw_input": raw_input,
                    "user_id": user_id,
                    "reason": err.to_string(),
                }),
            );
        }
        result
    }

    /// Validates a branch name
    pub fn validate_branch_name(&self, name: &str) -> Result<()> {
        let result = check_branch_name(name);
        let suspicious =
            name.contains("..") || name.contains("@{") || name.chars().any(char::is_control);
        if result.is_err() && suspicious {
            self.log_security_event("suspicious_branch_name", json!({ "branch": name }));
        }
        result
    }

    /// Validates a repository-relative file path
    pub fn validate_file_path(&self, path: &str, user_id: i64) -> Result<()> {
        let result = check_file_path(path);
        if let Err(err) = &result {
            self.log_security_event(
                "invalid_file_path",
                json!({ "path": path, "user_id": user_id, "reason": err.to_string() }),
            );
        }
        result
    }

    /// Rejects repositories above the size ceiling
    pub fn validate_repository_size(&self, bytes: u64) -> Result<()> {
        let max = self.limits.max_repository_size_bytes;
        if bytes > max {
            return Err(IngestError::ResourceLimit {
                message: format!(
                    "Repository is too large ({} > {}). Please choose a smaller repository or branch.",
                    format_bytes(bytes),
                    format_bytes(max)
                ),
                limit: LimitKind::RepositorySize,
                retry_after: None,
            });
        }
        Ok(())
    }

    /// Rejects file sets above the file-count ceiling
    pub fn validate_file_count(&self, count: usize) -> Result<()> {
        let max = self.limits.max_file_count;
        if count > max {
            return Err(IngestError::ResourceLimit {
                message: format!(
                    "Repository has too many files ({} > {}). Please choose a smaller repository or branch.",
                    count, max
                ),
                limit: LimitKind::FileCount,
                retry_after: None,
            });
        }
        Ok(())
    }

    /// Consumes one request from the user's budget
    pub async fn validate_rate_limit(&self, user_id: i64) -> Result<()> {
        match self.rate_limiter.check(user_id).await {
            RateLimitDecision::Allowed => Ok(()),
            RateLimitDecision::Exceeded { retry_after, .. } => {
                Err(IngestError::rate_limited(retry_after))
            }
        }
    }

    /// Strips bytes the analysis stage cannot handle
    pub fn sanitize_file_content(&self, content: &str) -> String {
        sanitize_file_content(content)
    }

    /// Writes an audit event; never fails
    pub fn log_security_event(&self, event: &str, context: Value) {
        warn!(target: SECURITY_TARGET, event, context = %context, "Security event");
    }
}

fn format_bytes(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}
