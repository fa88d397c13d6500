//! End-to-end ingestion of one repository branch.
//!
//! [`RepositoryOrchestrator::process`] owns the lifecycle of the
//! [`GitHubRepositoryRecord`] for a (user, repository, branch) triple: the
//! record is found or created, moved to `processing`, and always left either
//! `completed` or `failed`.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::analysis::has_plugin_header;
use crate::config::ProcessingConfig;
use crate::error::{IngestError, Result};
use crate::github::{extension_of, GitHubClient, RepositoryReference, TreeEntry};
use crate::parallel::ParallelProcessor;
use crate::store::{GitHubRepositoryRecord, PluginKind, PluginStructure, RepositoryStore};
use crate::validation::{check_file_path, ValidationService};

const MANIFEST_FILES: &[&str] = &["composer.json", "package.json"];

/// Everything the downstream stages need from one ingestion
#[derive(Debug, Clone)]
pub struct IngestionOutcome {
    /// The record after it was marked `completed`
    pub record: GitHubRepositoryRecord,
    /// Sanitized aggregate of every fetched file with boundary markers
    pub content: String,
    /// Hex SHA-256 of `content`
    pub content_hash: String,
    /// Files included in `content`
    pub files_processed: usize,
    /// Files whose content could not be fetched
    pub files_skipped: usize,
    /// Paths of the skipped files
    pub skipped_paths: Vec<String>,
    /// Shape of the plugin
    pub plugin_structure: PluginStructure,
}

struct Aggregate {
    content: String,
    files_processed: usize,
    skipped_paths: Vec<String>,
    structure: PluginStructure,
}

/// Drives the GitHub client, validation and persistence for an ingestion
pub struct RepositoryOrchestrator {
    client: GitHubClient,
    store: Arc<dyn RepositoryStore>,
    validation: Arc<ValidationService>,
    fetcher: ParallelProcessor,
}

impl RepositoryOrchestrator {
    /// Creates an orchestrator
    pub fn new(
        client: GitHubClient,
        store: Arc<dyn RepositoryStore>,
        validation: Arc<ValidationService>,
        processing: &ProcessingConfig,
    ) -> Self {
        Self {
            client,
            store,
            validation,
            fetcher: ParallelProcessor::new(processing.max_concurrent_fetches),
        }
    }

    /// Ingests one branch of a repository on behalf of a user
    pub async fn process(
        &self,
        user_id: i64,
        reference: &RepositoryReference,
        branch: &str,
    ) -> Result<IngestionOutcome> {
        info!(
            "Processing {}@{} for user {}",
            reference.full_name, branch, user_id
        );

        let record = self.open_record(user_id, reference, branch).await?;

        match self.build(&record, reference, branch).await {
            Ok(aggregate) => {
                self.store
                    .mark_completed(record.id, aggregate.files_processed, &aggregate.structure)
                    .await?;
                let record = self.reload(record.id).await?;
                let content_hash = content_hash(&aggregate.content);

                info!(
                    "Completed {}@{}: {} files, {} skipped, hash {}",
                    reference.full_name,
                    branch,
                    aggregate.files_processed,
                    aggregate.skipped_paths.len(),
                    content_hash
                );

                Ok(IngestionOutcome {
                    record,
                    content: aggregate.content,
                    content_hash,
                    files_processed: aggregate.files_processed,
                    files_skipped: aggregate.skipped_paths.len(),
                    skipped_paths: aggregate.skipped_paths,
                    plugin_structure: aggregate.structure,
                })
            }
            Err(err) => {
                warn!(
                    "Processing {}@{} failed: {}",
                    reference.full_name, branch, err
                );
                if let Err(store_err) = self.store.mark_failed(record.id, &err.to_string()).await {
                    warn!("Could not mark record {} as failed: {}", record.id, store_err);
                }
                Err(err)
            }
        }
    }

    async fn open_record(
        &self,
        user_id: i64,
        reference: &RepositoryReference,
        branch: &str,
    ) -> Result<GitHubRepositoryRecord> {
        let existing = self
            .store
            .find_repository(user_id, &reference.full_name, branch)
            .await?;

        let id = match existing {
            Some(record) => {
                debug!("Reusing record {} for {}@{}", record.id, reference.full_name, branch);
                record.id
            }
            None => {
                let info = self
                    .client
                    .get_repository_info(&reference.owner, &reference.repo)
                    .await?;
                self.store
                    .create_repository(user_id, reference, branch, &info)
                    .await?
                    .id
            }
        };

        self.store.mark_processing(id).await?;
        self.reload(id).await
    }

    async fn reload(&self, id: i64) -> Result<GitHubRepositoryRecord> {
        self.store
            .get_repository(id)
            .await?
            .ok_or_else(|| IngestError::Storage(format!("repository record {} disappeared", id)))
    }

    async fn build(
        &self,
        record: &GitHubRepositoryRecord,
        reference: &RepositoryReference,
        branch: &str,
    ) -> Result<Aggregate> {
        let (owner, repo) = (reference.owner.as_str(), reference.repo.as_str());

        let size_bytes = if record.has_metadata() {
            u64::try_from(record.size_bytes).unwrap_or(0)
        } else {
            let info = self.client.get_repository_info(owner, repo).await?;
            self.store.update_metadata(record.id, &info).await?;
            info.size_bytes()
        };
        self.validation.validate_repository_size(size_bytes)?;

        let tree = self
            .client
            .get_repository_tree(owner, repo, branch, true)
            .await?;
        let files: Vec<&TreeEntry> = tree.iter().filter(|entry| entry.is_file()).collect();
        self.validation.validate_file_count(files.len())?;
        if files.is_empty() {
            return Err(IngestError::validation(format!(
                "{}@{} contains no supported plugin files",
                reference.full_name, branch
            )));
        }

        let max_files = self.validation.limits().max_file_count;
        let (dispatch, rejected): (Vec<&TreeEntry>, Vec<&TreeEntry>) = files
            .into_iter()
            .take(max_files)
            .partition(|entry| check_file_path(&entry.path).is_ok());

        let mut skipped_paths: Vec<String> = Vec::new();
        for entry in &rejected {
            warn!("Skipping unsafe path {:?} in {}", entry.path, reference.full_name);
            skipped_paths.push(entry.path.clone());
        }

        let fetches: Vec<_> = dispatch
            .iter()
            .map(|entry| {
                let client = self.client.clone();
                let (owner, repo, branch) = (owner.to_string(), repo.to_string(), branch.to_string());
                let path = entry.path.clone();
                async move { client.get_file_content(&owner, &repo, &path, &branch).await }
            })
            .collect();
        let results = self.fetcher.process(fetches).await;

        let mut content = String::new();
        let mut fetched: Vec<(&str, String)> = Vec::new();
        let mut first_error: Option<IngestError> = None;

        for (entry, result) in dispatch.iter().zip(results) {
            match result {
                Ok(file) => {
                    content.push_str(&format!("// ===== File: {} =====\n", entry.path));
                    content.push_str(&file.content);
                    if !file.content.ends_with('\n') {
                        content.push('\n');
                    }
                    content.push('\n');
                    fetched.push((entry.path.as_str(), file.content));
                }
                Err(err) if err.is_path_specific() => {
                    warn!("Skipping {} in {}: {}", entry.path, reference.full_name, err);
                    skipped_paths.push(entry.path.clone());
                    first_error.get_or_insert(err.into());
                }
                // Rate limits, credential problems and outages hit every file alike.
                Err(err) => return Err(err.into()),
            }
        }

        if fetched.is_empty() {
            return Err(first_error.unwrap_or_else(|| {
                IngestError::validation(format!(
                    "No file of {}@{} could be fetched",
                    reference.full_name, branch
                ))
            }));
        }

        let structure = plugin_structure(&tree, &fetched);
        Ok(Aggregate {
            content: self.validation.sanitize_file_content(&content),
            files_processed: fetched.len(),
            skipped_paths,
            structure,
        })
    }
}

/// Hex SHA-256 of an aggregated payload
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Classifies a plugin from its filtered tree and the fetched file contents
pub fn plugin_structure(tree: &[TreeEntry], fetched: &[(&str, String)]) -> PluginStructure {
    let files: Vec<&TreeEntry> = tree.iter().filter(|e| e.is_file()).collect();
    let count_ext = |exts: &[&str]| {
        files
            .iter()
            .filter(|e| e.extension().map_or(false, |ext| exts.contains(&ext.as_str())))
            .count()
    };

    // Root-level files win when several carry a header.
    let mut candidates: Vec<&(&str, String)> = fetched
        .iter()
        .filter(|(path, content)| {
            extension_of(path).as_deref() == Some("php") && has_plugin_header(content)
        })
        .collect();
    candidates.sort_by_key(|(path, _)| path.matches('/').count());

    PluginStructure {
        kind: if files.len() == 1 {
            PluginKind::SingleFile
        } else {
            PluginKind::MultiFile
        },
        has_manifest: files
            .iter()
            .any(|e| MANIFEST_FILES.contains(&e.name.to_lowercase().as_str())),
        has_readme: files
            .iter()
            .any(|e| e.name.to_lowercase().starts_with("readme")),
        main_file: candidates.first().map(|(path, _)| path.to_string()),
        php_files: count_ext(&["php"]),
        js_files: count_ext(&["js", "jsx", "ts", "tsx"]),
        directories: tree.iter().filter(|e| !e.is_file()).count(),
    }
}
