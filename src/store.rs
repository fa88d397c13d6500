//! Persistence of ingestion records and analysis results.
//!
//! The orchestrator and HTTP layer only see [`RepositoryStore`]; the shipped
//! implementation is [`SqliteStore`]. Timestamps are stored as RFC 3339
//! strings.
//!
//! Repository records are keyed by (user, full name, branch) where the full
//! name compares case-insensitively, as on GitHub. Analysis rows are keyed by
//! content hash alone and belong to whoever ingested that content last.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::github::{RepoInfo, RepositoryReference};

/// Lifecycle of one ingestion record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// Created, not yet started
    Pending,
    /// Pipeline running
    Processing,
    /// Payload built
    Completed,
    /// Pipeline stopped with an error
    Failed,
}

impl ProcessingStatus {
    /// Column value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(IngestError::Storage(format!("unknown processing status {}", other))),
        }
    }
}

/// Single-file or multi-file plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    /// Exactly one ingestible file
    SingleFile,
    /// More than one ingestible file
    MultiFile,
}

/// Coarse shape of an ingested plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginStructure {
    /// Single or multi file
    pub kind: PluginKind,
    /// `composer.json` or `package.json` present
    pub has_manifest: bool,
    /// A readme file is present
    pub has_readme: bool,
    /// PHP file carrying the `Plugin Name:` header
    pub main_file: Option<String>,
    /// Number of PHP files
    pub php_files: usize,
    /// Number of JavaScript and TypeScript files
    pub js_files: usize,
    /// Number of directories in the filtered tree
    pub directories: usize,
}

/// One ingestion attempt per (user, repository, branch)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GitHubRepositoryRecord {
    pub id: i64,
    pub user_id: i64,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub full_name: String,
    pub github_id: Option<i64>,
    pub description: Option<String>,
    pub is_private: bool,
    pub default_branch: Option<String>,
    pub size_bytes: i64,
    pub language: Option<String>,
    pub clone_url: Option<String>,
    pub html_url: Option<String>,
    pub processing_status: ProcessingStatus,
    pub file_count: i64,
    pub plugin_structure: Option<PluginStructure>,
    pub processing_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GitHubRepositoryRecord {
    /// Whether GitHub metadata was ever stored on the record
    pub fn has_metadata(&self) -> bool {
        self.github_id.is_some()
    }
}

/// Persisted analysis of one aggregated payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRecord {
    pub id: i64,
    pub user_id: i64,
    pub filename: String,
    pub file_hash: String,
    pub analysis_data: Value,
    pub provider: String,
    pub framework: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values for an analysis upsert
#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub user_id: i64,
    pub filename: String,
    pub file_hash: String,
    pub analysis_data: Value,
    pub provider: String,
    pub framework: String,
}

/// Storage used by the ingestion pipeline
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    /// Looks up the record for a (user, repository, branch) triple
    async fn find_repository(
        &self,
        user_id: i64,
        full_name: &str,
        branch: &str,
    ) -> Result<Option<GitHubRepositoryRecord>>;

    /// Fetches a record by id
    async fn get_repository(&self, id: i64) -> Result<Option<GitHubRepositoryRecord>>;

    /// Inserts a `pending` record, or returns the existing one for the triple
    async fn create_repository(
        &self,
        user_id: i64,
        reference: &RepositoryReference,
        branch: &str,
        info: &RepoInfo,
    ) -> Result<GitHubRepositoryRecord>;

    /// Overwrites the GitHub metadata columns
    async fn update_metadata(&self, id: i64, info: &RepoInfo) -> Result<()>;

    /// Moves a record to `processing` and clears the previous error
    async fn mark_processing(&self, id: i64) -> Result<()>;

    /// Moves a record to `completed`
    async fn mark_completed(&self, id: i64, file_count: usize, structure: &PluginStructure)
        -> Result<()>;

    /// Moves a record to `failed`
    async fn mark_failed(&self, id: i64, error: &str) -> Result<()>;

    /// Number of records owned by a user
    async fn count_repositories(&self, user_id: i64) -> Result<i64>;

    /// Inserts or updates by content hash; the flag is true when a row was created
    async fn upsert_analysis(&self, analysis: &NewAnalysis) -> Result<(AnalysisRecord, bool)>;

    /// Looks up an analysis by content hash
    async fn find_analysis_by_hash(&self, file_hash: &str) -> Result<Option<AnalysisRecord>>;

    /// Total number of analysis rows
    async fn count_analyses(&self) -> Result<i64>;
}

/// Create a SqlitePool with WAL mode for file databases.
///
/// In-memory databases get a single connection that never idles out, so
/// every query sees the same database.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let in_memory = database_url.contains(":memory:");
    let mut options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| IngestError::Config(format!("Invalid database URL: {}", e)))?
        .create_if_missing(true);
    if !in_memory {
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
    }

    let pool = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?
    };

    debug!("database pool created");
    Ok(pool)
}

/// Creates the tables and indexes if they are missing
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS github_repositories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            owner TEXT NOT NULL,
            repo TEXT NOT NULL,
            branch TEXT NOT NULL,
            full_name TEXT NOT NULL COLLATE NOCASE,
            github_id INTEGER,
            description TEXT,
            is_private INTEGER NOT NULL DEFAULT 0,
            default_branch TEXT,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            language TEXT,
            clone_url TEXT,
            html_url TEXT,
            processing_status TEXT NOT NULL DEFAULT 'pending',
            file_count INTEGER NOT NULL DEFAULT 0,
            plugin_structure TEXT,
            processing_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(user_id, full_name, branch)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            filename TEXT NOT NULL,
            file_hash TEXT NOT NULL UNIQUE,
            analysis_data TEXT NOT NULL,
            provider TEXT NOT NULL,
            framework TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_github_repositories_user ON github_repositories(user_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

const REPOSITORY_COLUMNS: &str = "id, user_id, owner, repo, branch, full_name, github_id, \
     description, is_private, default_branch, size_bytes, language, clone_url, html_url, \
     processing_status, file_count, plugin_structure, processing_error, created_at, updated_at";

const ANALYSIS_COLUMNS: &str = "id, user_id, filename, file_hash, analysis_data, provider, \
     framework, created_at, updated_at";

/// SQLite backed [`RepositoryStore`]
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wraps an existing pool; the schema must already exist
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens the database and applies the schema
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RepositoryStore for SqliteStore {
    async fn find_repository(
        &self,
        user_id: i64,
        full_name: &str,
        branch: &str,
    ) -> Result<Option<GitHubRepositoryRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM github_repositories WHERE user_id = ? AND full_name = ? AND branch = ?",
            REPOSITORY_COLUMNS
        ))
        .bind(user_id)
        .bind(full_name)
        .bind(branch)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_repository).transpose()
    }

    async fn get_repository(&self, id: i64) -> Result<Option<GitHubRepositoryRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM github_repositories WHERE id = ?",
            REPOSITORY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_repository).transpose()
    }

    async fn create_repository(
        &self,
        user_id: i64,
        reference: &RepositoryReference,
        branch: &str,
        info: &RepoInfo,
    ) -> Result<GitHubRepositoryRecord> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO github_repositories (
                user_id, owner, repo, branch, full_name, github_id, description, is_private,
                default_branch, size_bytes, language, clone_url, html_url, processing_status,
                file_count, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', 0, ?, ?)
            ON CONFLICT(user_id, full_name, branch) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(&reference.owner)
        .bind(&reference.repo)
        .bind(branch)
        .bind(&reference.full_name)
        .bind(info.id as i64)
        .bind(&info.description)
        .bind(info.private)
        .bind(&info.default_branch)
        .bind(info.size_bytes() as i64)
        .bind(&info.language)
        .bind(&info.clone_url)
        .bind(&info.html_url)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(
                "Record for {}@{} already existed for user {}",
                reference.full_name, branch, user_id
            );
        }

        self.find_repository(user_id, &reference.full_name, branch)
            .await?
            .ok_or_else(|| IngestError::Storage("record vanished after insert".to_string()))
    }

    async fn update_metadata(&self, id: i64, info: &RepoInfo) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE github_repositories
            SET github_id = ?, description = ?, is_private = ?, default_branch = ?,
                size_bytes = ?, language = ?, clone_url = ?, html_url = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(info.id as i64)
        .bind(&info.description)
        .bind(info.private)
        .bind(&info.default_branch)
        .bind(info.size_bytes() as i64)
        .bind(&info.language)
        .bind(&info.clone_url)
        .bind(&info.html_url)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_processing(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE github_repositories SET processing_status = ?, processing_error = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(ProcessingStatus::Processing.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_completed(
        &self,
        id: i64,
        file_count: usize,
        structure: &PluginStructure,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE github_repositories
            SET processing_status = ?, file_count = ?, plugin_structure = ?,
                processing_error = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(ProcessingStatus::Completed.as_str())
        .bind(file_count as i64)
        .bind(serde_json::to_string(structure)?)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE github_repositories SET processing_status = ?, processing_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(ProcessingStatus::Failed.as_str())
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_repositories(&self, user_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM github_repositories WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn upsert_analysis(&self, analysis: &NewAnalysis) -> Result<(AnalysisRecord, bool)> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM analysis_results WHERE file_hash = ?")
                .bind(&analysis.file_hash)
                .fetch_optional(&mut *tx)
                .await?;

        sqlx::query(
            r#"
            INSERT INTO analysis_results (
                user_id, filename, file_hash, analysis_data, provider, framework, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_hash) DO UPDATE SET
                user_id = excluded.user_id,
                filename = excluded.filename,
                analysis_data = excluded.analysis_data,
                provider = excluded.provider,
                framework = excluded.framework,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(analysis.user_id)
        .bind(&analysis.filename)
        .bind(&analysis.file_hash)
        .bind(serde_json::to_string(&analysis.analysis_data)?)
        .bind(&analysis.provider)
        .bind(&analysis.framework)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM analysis_results WHERE file_hash = ?",
            ANALYSIS_COLUMNS
        ))
        .bind(&analysis.file_hash)
        .fetch_one(&mut *tx)
        .await?;
        let record = row_to_analysis(&row)?;

        tx.commit().await?;
        Ok((record, existing.is_none()))
    }

    async fn find_analysis_by_hash(&self, file_hash: &str) -> Result<Option<AnalysisRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM analysis_results WHERE file_hash = ?",
            ANALYSIS_COLUMNS
        ))
        .bind(file_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_analysis).transpose()
    }

    async fn count_analyses(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM analysis_results")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| IngestError::Storage(e.to_string()))
}

fn row_to_repository(row: &SqliteRow) -> Result<GitHubRepositoryRecord> {
    let status: String = row.try_get("processing_status")?;
    let structure: Option<String> = row.try_get("plugin_structure")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(GitHubRepositoryRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        owner: row.try_get("owner")?,
        repo: row.try_get("repo")?,
        branch: row.try_get("branch")?,
        full_name: row.try_get("full_name")?,
        github_id: row.try_get("github_id")?,
        description: row.try_get("description")?,
        is_private: row.try_get("is_private")?,
        default_branch: row.try_get("default_branch")?,
        size_bytes: row.try_get("size_bytes")?,
        language: row.try_get("language")?,
        clone_url: row.try_get("clone_url")?,
        html_url: row.try_get("html_url")?,
        processing_status: status.parse()?,
        file_count: row.try_get("file_count")?,
        plugin_structure: structure
            .map(|s| serde_json::from_str(&s))
            .transpose()?,
        processing_error: row.try_get("processing_error")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_analysis(row: &SqliteRow) -> Result<AnalysisRecord> {
    let data: String = row.try_get("analysis_data")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(AnalysisRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        filename: row.try_get("filename")?,
        file_hash: row.try_get("file_hash")?,
        analysis_data: serde_json::from_str(&data)?,
        provider: row.try_get("provider")?,
        framework: row.try_get("framework")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}
