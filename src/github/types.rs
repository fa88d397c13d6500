//! Internal shapes handed to callers, plus the raw GitHub payloads they are built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A validated `owner/repo` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryReference {
    /// Account or organization login
    pub owner: String,
    /// Repository name without `.git`
    pub repo: String,
    /// Always `"{owner}/{repo}"`
    pub full_name: String,
    /// Canonical `https://github.com/{owner}/{repo}` URL
    pub url: String,
}

impl RepositoryReference {
    /// Builds a reference from already-validated parts
    pub fn new(owner: &str, repo: &str) -> Self {
        Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            full_name: format!("{}/{}", owner, repo),
            url: format!("https://github.com/{}/{}", owner, repo),
        }
    }
}

/// Repository metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoInfo {
    /// GitHub numeric id
    pub id: u64,
    /// Repository name
    pub name: String,
    /// `owner/repo`
    pub full_name: String,
    /// Free-form description
    pub description: Option<String>,
    /// Whether the repository is private
    pub private: bool,
    /// Branch checked out by default
    pub default_branch: String,
    /// Size in KiB as reported by GitHub
    pub size: u64,
    /// Primary language
    pub language: Option<String>,
    /// HTTPS clone URL
    pub clone_url: String,
    /// Browser URL
    pub html_url: String,
    /// Last update
    pub updated_at: Option<DateTime<Utc>>,
}

impl RepoInfo {
    /// Repository size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.size.saturating_mul(1024)
    }
}

/// One branch of a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchDescriptor {
    /// Branch name
    pub name: String,
    /// Head commit
    pub commit_sha: String,
    /// API URL of the head commit
    pub commit_url: String,
    /// Whether branch protection is enabled
    pub protected: bool,
}

/// Kind of a tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// Regular file (`blob`)
    File,
    /// Directory (`tree`), possibly synthesized
    Dir,
}

/// One path in a flattened repository listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Full path from the repository root
    pub path: String,
    /// Last path segment
    pub name: String,
    /// File or directory
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Object sha; empty for synthesized directories
    pub sha: String,
    /// Size in bytes; zero for directories
    pub size: i64,
    /// API URL of the object; empty for synthesized directories
    pub url: String,
}

impl TreeEntry {
    /// Whether the entry is a file
    pub fn is_file(&self) -> bool {
        self.entry_type == EntryType::File
    }

    /// Lower-cased extension of a file path, if any
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.path)
    }
}

/// Last path segment of a slash separated path
pub fn name_from_path(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Lower-cased extension of the last path segment
pub fn extension_of(path: &str) -> Option<String> {
    let name = name_from_path(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => Some(name[idx + 1..].to_lowercase()),
        _ => None,
    }
}

/// A decoded file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileContent {
    /// File name
    pub name: String,
    /// Full path
    pub path: String,
    /// Decoded text content
    pub content: String,
    /// Size in bytes as reported by GitHub
    pub size: u64,
    /// Blob sha
    pub sha: String,
    /// Transport encoding GitHub used (normally `base64`)
    pub encoding: String,
    /// API URL
    pub url: String,
    /// Browser URL
    pub html_url: Option<String>,
    /// Raw download URL
    pub download_url: Option<String>,
}

/// Outcome of checking the service credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenStatus {
    /// Whether GitHub accepted the token
    pub valid: bool,
    /// Login the token belongs to
    pub login: Option<String>,
    /// OAuth scopes granted to the token
    pub scopes: Vec<String>,
    /// Human readable summary
    pub message: String,
}

/// GitHub's core API budget for the service credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    /// Requests per hour
    pub limit: u64,
    /// Requests left in the current hour
    pub remaining: u64,
    /// Reset time
    pub reset: DateTime<Utc>,
    /// Requests used
    pub used: u64,
}

// ---------------------------------------------------------------------------
// Raw API payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct ApiRepository {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub full_name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub private: bool,
    pub default_branch: Option<String>,
    #[serde(default)]
    pub size: u64,
    pub language: Option<String>,
    #[serde(default)]
    pub clone_url: String,
    #[serde(default)]
    pub html_url: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<ApiRepository> for RepoInfo {
    fn from(raw: ApiRepository) -> Self {
        Self {
            id: raw.id,
            name: raw.name,
            full_name: raw.full_name,
            description: raw.description,
            private: raw.private,
            default_branch: raw.default_branch.unwrap_or_else(|| "main".to_string()),
            size: raw.size,
            language: raw.language,
            clone_url: raw.clone_url,
            html_url: raw.html_url,
            updated_at: raw.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiBranch {
    pub name: String,
    pub commit: ApiCommitRef,
    #[serde(default)]
    pub protected: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiCommitRef {
    pub sha: String,
    #[serde(default)]
    pub url: String,
}

impl From<ApiBranch> for BranchDescriptor {
    fn from(raw: ApiBranch) -> Self {
        Self {
            name: raw.name,
            commit_sha: raw.commit.sha,
            commit_url: raw.commit.url,
            protected: raw.protected,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiTree {
    #[serde(default)]
    pub tree: Vec<ApiTreeItem>,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiTreeItem {
    pub path: String,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub sha: String,
    pub size: Option<i64>,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiContent {
    #[serde(rename = "type", default)]
    pub content_type: String,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub sha: String,
    #[serde(default)]
    pub size: u64,
    pub encoding: Option<String>,
    pub content: Option<String>,
    #[serde(default)]
    pub url: String,
    pub html_url: Option<String>,
    pub download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiRateLimit {
    pub resources: ApiRateResources,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiRateResources {
    pub core: ApiRateBucket,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiRateBucket {
    pub limit: u64,
    pub remaining: u64,
    pub reset: i64,
    #[serde(default)]
    pub used: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiUser {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
}
