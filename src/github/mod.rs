//! GitHub REST API access: a typed client, normalized errors and tree flattening.

mod client;
mod error;
mod tree;
mod types;

pub use client::GitHubClient;
pub use error::GitHubError;
pub use tree::ExtensionFilter;
pub use types::{
    extension_of, name_from_path, BranchDescriptor, EntryType, FileContent, RateLimitInfo,
    RepoInfo, RepositoryReference, TokenStatus, TreeEntry,
};
