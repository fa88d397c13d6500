#![warn(clippy::all)]

//! ThinkTest ingestion - GitHub repository intake for WordPress plugin test generation
//!
//! This library validates user supplied repository references, talks to the
//! GitHub REST API with every outcome folded into a small set of error kinds,
//! and flattens a plugin branch into one analyzable payload with idempotent
//! record keeping.
//!
//! ## Features
//! - URL, owner/repo, branch and path validation with security audit logging
//! - Per-user sliding window rate limiting over a pluggable counter store
//! - GitHub client with branch pagination, tree synthesis and base64 decoding
//! - Read-through caches that fall back to stale data when GitHub fails
//! - SQLite persistence of ingestion records and analysis results
//! - axum HTTP surface with a uniform error body
//!
//! ## Usage
//! ```rust,no_run
//! use std::sync::Arc;
//! use thinktest_ingest::{Config, GitHubClient, RateLimiter, ValidationService};
//!
//! async fn example() -> thinktest_ingest::Result<()> {
//!     let config = Config::load()?;
//!     let limiter = Arc::new(RateLimiter::new(&config.rate_limits));
//!     let validation = ValidationService::new(config.limits.clone(), limiter);
//!
//!     let reference = validation.validate_repository_url("WordPress/hello-dolly", 1)?;
//!     let client = GitHubClient::new(&config)?;
//!     let info = client.get_repository_info(&reference.owner, &reference.repo).await?;
//!     println!("default branch: {}", info.default_branch);
//!     Ok(())
//! }
//! ```

/// Static scan of aggregated plugin sources
pub mod analysis;
/// REST API for the web service
pub mod api;
/// Branch and tree caches with stale fallback
pub mod cache;
/// Configuration module for the application
pub mod config;
/// Error handling types and utilities
pub mod error;
/// Test generation collaborators
pub mod generation;
/// GitHub REST client
pub mod github;
/// Logging configuration and utilities
pub mod logging;
/// End-to-end repository ingestion
pub mod orchestrator;
/// Parallel processing utilities
pub mod parallel;
/// Per-user request budgets
pub mod rate_limiter;
/// Persistence of ingestion records and analyses
pub mod store;
/// Retry helpers
pub mod utils;
/// Input validation and security policy
pub mod validation;

// Re-export common types
pub use api::{create_app, AppState};
pub use cache::GitHubCache;
pub use config::Config;
pub use error::{IngestError, Result};
pub use github::{GitHubClient, GitHubError, RepositoryReference};
pub use orchestrator::{IngestionOutcome, RepositoryOrchestrator};
pub use rate_limiter::RateLimiter;
pub use store::{RepositoryStore, SqliteStore};
pub use validation::ValidationService;
