use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{TimeZone, Utc};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{redirect, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::error::GitHubError;
use super::tree::{build_tree, ExtensionFilter};
use super::types::{
    ApiBranch, ApiContent, ApiErrorBody, ApiRateLimit, ApiRepository, ApiTree, ApiUser,
    BranchDescriptor, FileContent, RateLimitInfo, RepoInfo, TokenStatus, TreeEntry,
};
use crate::config::Config;
use crate::error::{IngestError, Result};
use crate::validation;

const API_VERSION: &str = "2022-11-28";
const BRANCHES_PER_PAGE: usize = 100;
// Guards against a misbehaving server that never returns a short page.
const MAX_BRANCH_PAGES: usize = 50;

type GitHubResult<T> = std::result::Result<T, GitHubError>;

/// Thin client over the GitHub REST API
///
/// Every call carries the service credential, an explicit timeout, and
/// refuses to follow redirects so a login-page bounce is reported instead of
/// silently parsed.
#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
    filter: ExtensionFilter,
}

impl GitHubClient {
    /// Creates a client from the service configuration
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static(API_VERSION));
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_str(&config.github.user_agent)
                .map_err(|e| IngestError::Config(format!("Invalid user agent: {}", e)))?,
        );

        let client = Client::builder()
            .timeout(config.github_timeout())
            .connect_timeout(Duration::from_secs(10))
            .redirect(redirect::Policy::none())
            .default_headers(headers)
            .build()
            .map_err(|e| IngestError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = Url::parse(&config.github.api_base_url)
            .map_err(|e| IngestError::Config(format!("Invalid GitHub API base URL: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            token: config.github.token.clone(),
            filter: ExtensionFilter::new(&config.limits.allowed_extensions),
        })
    }

    /// True only when GitHub answers the repository lookup with 200
    pub async fn is_repository_accessible(&self, owner: &str, repo: &str) -> bool {
        let url = match self.endpoint(&["repos", owner, repo]) {
            Ok(url) => url,
            Err(_) => return false,
        };
        match self.send(url).await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                debug!("Accessibility check for {}/{} failed: {}", owner, repo, e);
                false
            }
        }
    }

    /// Fetches repository metadata
    pub async fn get_repository_info(&self, owner: &str, repo: &str) -> GitHubResult<RepoInfo> {
        let url = self.endpoint(&["repos", owner, repo])?;
        let raw: ApiRepository = self
            .get_json(url, &format!("Repository {}/{}", owner, repo))
            .await?;
        Ok(raw.into())
    }

    /// Lists every branch, following pagination
    pub async fn get_repository_branches(
        &self,
        owner: &str,
        repo: &str,
    ) -> GitHubResult<Vec<BranchDescriptor>> {
        let mut branches = Vec::new();

        for page in 1..=MAX_BRANCH_PAGES {
            let mut url = self.endpoint(&["repos", owner, repo, "branches"])?;
            url.query_pairs_mut()
                .append_pair("per_page", &BRANCHES_PER_PAGE.to_string())
                .append_pair("page", &page.to_string());

            let batch: Vec<ApiBranch> = self
                .get_json(url, &format!("Repository {}/{}", owner, repo))
                .await?;
            let batch_len = batch.len();

            for raw in batch {
                if validation::check_branch_name(&raw.name).is_ok() {
                    branches.push(BranchDescriptor::from(raw));
                } else {
                    warn!(
                        "Dropping branch with unsupported name {:?} from {}/{}",
                        raw.name, owner, repo
                    );
                }
            }

            if batch_len < BRANCHES_PER_PAGE {
                break;
            }
        }

        debug!("Fetched {} branches for {}/{}", branches.len(), owner, repo);
        Ok(branches)
    }

    /// Fetches the tree of a branch, filtered to supported file types
    pub async fn get_repository_tree(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        recursive: bool,
    ) -> GitHubResult<Vec<TreeEntry>> {
        let mut segments = vec!["repos", owner, repo, "git", "trees"];
        segments.extend(branch.split('/'));
        let mut url = self.endpoint(&segments)?;
        if recursive {
            url.query_pairs_mut().append_pair("recursive", "1");
        }

        let raw: ApiTree = self
            .get_json(url, &format!("Branch {} of {}/{}", branch, owner, repo))
            .await?;
        if raw.truncated {
            warn!(
                "GitHub truncated the tree of {}/{}@{}; the listing is incomplete",
                owner, repo, branch
            );
        }

        let total = raw.tree.len();
        let entries = build_tree(raw.tree, &self.filter);
        debug!(
            "Tree {}/{}@{}: {} raw items, {} kept",
            owner,
            repo,
            branch,
            total,
            entries.len()
        );
        Ok(entries)
    }

    /// Fetches and decodes one file
    pub async fn get_file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> GitHubResult<FileContent> {
        let mut segments = vec!["repos", owner, repo, "contents"];
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
        let mut url = self.endpoint(&segments)?;
        url.query_pairs_mut().append_pair("ref", branch);

        let value: Value = self
            .get_json(url, &format!("File {} in {}/{}", path, owner, repo))
            .await?;
        if value.is_array() {
            return Err(GitHubError::MalformedResponse(format!(
                "{} is a directory, not a file",
                path
            )));
        }
        let raw: ApiContent = serde_json::from_value(value)
            .map_err(|e| GitHubError::MalformedResponse(e.to_string()))?;
        if raw.content_type != "file" && !raw.content_type.is_empty() {
            return Err(GitHubError::MalformedResponse(format!(
                "{} is a {}, not a file",
                path, raw.content_type
            )));
        }

        let encoding = raw.encoding.clone().unwrap_or_else(|| "none".to_string());
        let content = decode_content(&encoding, raw.content.as_deref().unwrap_or(""))?;

        Ok(FileContent {
            name: raw.name,
            path: raw.path,
            content,
            size: raw.size,
            sha: raw.sha,
            encoding,
            url: raw.url,
            html_url: raw.html_url,
            download_url: raw.download_url,
        })
    }

    /// Checks whether the service credential is accepted by GitHub
    pub async fn verify_api_token(&self) -> GitHubResult<TokenStatus> {
        if self.token.is_none() {
            return Ok(TokenStatus {
                valid: false,
                login: None,
                scopes: Vec::new(),
                message: "No GitHub token configured".to_string(),
            });
        }

        let url = self.endpoint(&["user"])?;
        let response = self.send(url).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Ok(TokenStatus {
                valid: false,
                login: None,
                scopes: Vec::new(),
                message: "GitHub rejected the configured token".to_string(),
            });
        }

        let scopes = response
            .headers()
            .get("x-oauth-scopes")
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let user: ApiUser = parse_response(response, "Authenticated user").await?;
        Ok(TokenStatus {
            valid: true,
            message: format!("Token is valid for {}", user.login),
            login: Some(user.login),
            scopes,
        })
    }

    /// Reads GitHub's core rate-limit bucket for the service credential
    pub async fn get_rate_limit_info(&self) -> GitHubResult<RateLimitInfo> {
        let url = self.endpoint(&["rate_limit"])?;
        let raw: ApiRateLimit = self.get_json(url, "Rate limit status").await?;
        let core = raw.resources.core;

        Ok(RateLimitInfo {
            limit: core.limit,
            remaining: core.remaining,
            reset: Utc
                .timestamp_opt(core.reset, 0)
                .single()
                .unwrap_or_else(Utc::now),
            used: core.used,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> GitHubResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GitHubError::Transport("GitHub API base URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, url: Url) -> GitHubResult<Response> {
        debug!("GET {}", url);
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        Ok(request.send().await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, what: &str) -> GitHubResult<T> {
        let response = self.send(url).await?;
        parse_response(response, what).await
    }
}

/// Maps a GitHub response onto the normalized success/error shapes
async fn parse_response<T: DeserializeOwned>(response: Response, what: &str) -> GitHubResult<T> {
    let status = response.status();

    if status.is_redirection() {
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        warn!("GitHub redirected {} to {:?}", what, location);
        return Err(GitHubError::Redirect {
            status: status.as_u16(),
            location,
        });
    }

    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
        let exhausted = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| v.trim() == "0");
        let reset_at = rate_limit_reset(response.headers());
        let message = error_message(response).await;

        if status == StatusCode::TOO_MANY_REQUESTS
            || exhausted
            || message.to_lowercase().contains("rate limit")
        {
            warn!("GitHub rate limit hit while fetching {}", what);
            return Err(GitHubError::RateLimited { reset_at });
        }
        return Err(GitHubError::Auth(message));
    }

    if status == StatusCode::UNAUTHORIZED {
        return Err(GitHubError::Auth(error_message(response).await));
    }

    if status == StatusCode::NOT_FOUND {
        return Err(GitHubError::NotFound(what.to_string()));
    }

    if !status.is_success() {
        let message = error_message(response).await;
        return Err(GitHubError::api_error(status.as_u16(), message));
    }

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();
    if !content_type.is_empty() && !content_type.contains("json") {
        return Err(GitHubError::MalformedResponse(format!(
            "expected JSON for {}, got {}",
            what, content_type
        )));
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        let looks_like_html = bytes.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'<');
        if looks_like_html {
            GitHubError::MalformedResponse(format!("HTML page returned for {}", what))
        } else {
            GitHubError::MalformedResponse(format!("undecodable body for {}: {}", what, e))
        }
    })
}

fn rate_limit_reset(headers: &HeaderMap) -> Option<chrono::DateTime<Utc>> {
    let header_num = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    if let Some(epoch) = header_num("x-ratelimit-reset") {
        return Utc.timestamp_opt(epoch, 0).single();
    }
    header_num("retry-after").map(|secs| Utc::now() + chrono::Duration::seconds(secs))
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    match response.json::<ApiErrorBody>().await {
        Ok(body) if !body.message.is_empty() => body.message,
        _ => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
    }
}

fn decode_content(encoding: &str, content: &str) -> GitHubResult<String> {
    match encoding {
        "base64" => {
            let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = STANDARD
                .decode(compact.as_bytes())
                .map_err(|e| GitHubError::MalformedResponse(format!("invalid base64: {}", e)))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        "none" if content.is_empty() => Err(GitHubError::MalformedResponse(
            "file is too large for the contents API".to_string(),
        )),
        _ => Ok(content.to_string()),
    }
}
