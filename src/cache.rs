use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::github::{BranchDescriptor, GitHubClient, GitHubError, TreeEntry};

/// Message attached to responses served from an expired entry
pub const STALE_MESSAGE: &str = "GitHub is unavailable right now, showing cached data";

/// Where a cached lookup's value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CacheStatus {
    /// Served from an entry younger than the TTL
    Fresh {
        /// Entry age
        age: Duration,
    },
    /// Fetched from GitHub just now
    Live,
    /// Served from an expired entry because GitHub failed
    Stale {
        /// Entry age
        age: Duration,
    },
}

impl CacheStatus {
    /// Whether the value came from the cache
    pub fn is_cached(&self) -> bool {
        !matches!(self, Self::Live)
    }

    /// Age of the served entry, if it came from the cache
    pub fn age(&self) -> Option<Duration> {
        match self {
            Self::Fresh { age } | Self::Stale { age } => Some(*age),
            Self::Live => None,
        }
    }

    /// Notice for the caller when the data may be outdated
    pub fn message(&self) -> Option<&'static str> {
        match self {
            Self::Stale { .. } => Some(STALE_MESSAGE),
            _ => None,
        }
    }
}

/// A value plus where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    /// The value
    pub value: T,
    /// Provenance and age
    pub status: CacheStatus,
}

/// In-memory read-through cache that keeps expired entries as a fallback
#[derive(Debug)]
pub struct ResultCache<T> {
    store: Arc<RwLock<HashMap<String, (T, Instant)>>>,
    ttl: Duration,
    retention: Duration,
}

impl<T: Clone + Send + Sync + 'static> ResultCache<T> {
    /// Creates a cache serving entries younger than `ttl` and keeping them for `retention`
    pub fn new(ttl: Duration, retention: Duration) -> Self {
        Self {
            store: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            retention: retention.max(ttl),
        }
    }

    /// Returns an entry younger than the TTL with its age
    pub async fn get_fresh(&self, key: &str) -> Option<(T, Duration)> {
        let store = self.store.read().await;
        store
            .get(key)
            .map(|(value, time)| (value, time.elapsed()))
            .filter(|(_, age)| *age < self.ttl)
            .map(|(value, age)| (value.clone(), age))
    }

    /// Returns any retained entry with its age
    pub async fn get_retained(&self, key: &str) -> Option<(T, Duration)> {
        let store = self.store.read().await;
        store
            .get(key)
            .map(|(value, time)| (value, time.elapsed()))
            .filter(|(_, age)| *age < self.retention)
            .map(|(value, age)| (value.clone(), age))
    }

    /// Stores a value
    pub async fn set(&self, key: &str, value: T) {
        let mut store = self.store.write().await;
        store.insert(key.to_string(), (value, Instant::now()));
    }

    /// Removes an entry from the cache by its key
    pub async fn remove(&self, key: &str) -> bool {
        let mut store = self.store.write().await;
        store.remove(key).is_some()
    }

    /// Clears all entries from the cache
    pub async fn clear(&self) {
        self.store.write().await.clear();
    }

    /// Returns the number of entries in the cache
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    /// Checks if the cache is empty
    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }

    /// Removes entries past retention and returns the count of removed entries
    pub async fn prune(&self) -> usize {
        let mut store = self.store.write().await;
        let before_len = store.len();
        store.retain(|_, (_, time)| time.elapsed() < self.retention);
        before_len - store.len()
    }

    /// Serves a fresh entry, else fetches; on transient failure falls back to a retained entry
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<Cached<T>, GitHubError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GitHubError>>,
    {
        if let Some((value, age)) = self.get_fresh(key).await {
            debug!("Cache hit for {} (age {:?})", key, age);
            return Ok(Cached {
                value,
                status: CacheStatus::Fresh { age },
            });
        }

        match fetch().await {
            Ok(value) => {
                self.set(key, value.clone()).await;
                Ok(Cached {
                    value,
                    status: CacheStatus::Live,
                })
            }
            Err(err) if err.is_retryable() => {
                match self.get_retained(key).await {
                    Some((value, age)) => {
                        warn!("Serving stale {} (age {:?}) after GitHub failure: {}", key, age, err);
                        Ok(Cached {
                            value,
                            status: CacheStatus::Stale { age },
                        })
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }
}

/// Branch and tree lookups through their caches
pub struct GitHubCache {
    client: GitHubClient,
    branches: ResultCache<Vec<BranchDescriptor>>,
    trees: ResultCache<Vec<TreeEntry>>,
}

impl GitHubCache {
    /// Wraps a client with caches sized from the configuration
    pub fn new(client: GitHubClient, config: &CacheConfig) -> Self {
        Self {
            client,
            branches: ResultCache::new(config.branch_ttl(), config.stale_retention()),
            trees: ResultCache::new(config.tree_ttl(), config.stale_retention()),
        }
    }

    /// The wrapped client
    pub fn client(&self) -> &GitHubClient {
        &self.client
    }

    /// Branches of a repository
    pub async fn branches(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Cached<Vec<BranchDescriptor>>, GitHubError> {
        let key = branch_key(owner, repo);
        self.branches
            .get_or_fetch(&key, || self.client.get_repository_branches(owner, repo))
            .await
    }

    /// Filtered tree of a branch
    pub async fn tree(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        recursive: bool,
    ) -> Result<Cached<Vec<TreeEntry>>, GitHubError> {
        let key = tree_key(owner, repo, branch, recursive);
        self.trees
            .get_or_fetch(&key, || {
                self.client.get_repository_tree(owner, repo, branch, recursive)
            })
            .await
    }

    /// Drops entries past retention in both caches
    pub async fn prune(&self) -> usize {
        self.branches.prune().await + self.trees.prune().await
    }
}

fn branch_key(owner: &str, repo: &str) -> String {
    format!("{}/{}", owner.to_lowercase(), repo.to_lowercase())
}

fn tree_key(owner: &str, repo: &str, branch: &str, recursive: bool) -> String {
    format!("{}@{}#{}", branch_key(owner, repo), branch, recursive)
}

/// Starts the periodic prune task; abort the handle to stop it
pub fn spawn_sweeper(cache: Arc<GitHubCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = cache.prune().await;
            if removed > 0 {
                info!("Cache sweep removed {} expired entries", removed);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_fresh_hit_skips_fetch() {
        let cache = ResultCache::new(Duration::from_secs(60), Duration::from_secs(600));
        cache.set("a/b", vec![1, 2]).await;

        let cached = cache
            .get_or_fetch("a/b", || async { panic!("should not fetch") })
            .await
            .unwrap();
        assert_eq!(cached.value, vec![1, 2]);
        assert!(matches!(cached.status, CacheStatus::Fresh { .. }));
    }

    #[tokio::test]
    async fn test_live_fetch_populates() {
        let cache: ResultCache<u32> = ResultCache::new(Duration::from_secs(60), Duration::from_secs(600));
        let cached = cache.get_or_fetch("k", || async { Ok(7) }).await.unwrap();
        assert_eq!(cached.status, CacheStatus::Live);
        assert_eq!(cache.get_fresh("k").await.map(|(v, _)| v), Some(7));
    }

    #[tokio::test]
    async fn test_transport_failure_serves_stale() {
        let cache = ResultCache::new(Duration::from_millis(20), Duration::from_secs(600));
        cache.set("k", "old".to_string()).await;
        sleep(Duration::from_millis(40)).await;

        let cached = cache
            .get_or_fetch("k", || async { Err(GitHubError::Transport("refused".into())) })
            .await
            .unwrap();
        assert_eq!(cached.value, "old");
        assert!(cached.status.age().unwrap() >= Duration::from_millis(40));
        assert_eq!(cached.status.message(), Some(STALE_MESSAGE));
    }

    #[tokio::test]
    async fn test_rate_limit_serves_stale() {
        let cache = ResultCache::new(Duration::ZERO, Duration::from_secs(600));
        cache.set("k", 1u8).await;
        let cached = cache
            .get_or_fetch("k", || async { Err(GitHubError::RateLimited { reset_at: None }) })
            .await
            .unwrap();
        assert!(matches!(cached.status, CacheStatus::Stale { .. }));
    }

    #[tokio::test]
    async fn test_github_outage_serves_stale() {
        let cache = ResultCache::new(Duration::ZERO, Duration::from_secs(600));
        cache.set("k", 1u8).await;
        let cached = cache
            .get_or_fetch("k", || async { Err(GitHubError::api_error(502, "Bad Gateway")) })
            .await
            .unwrap();
        assert!(matches!(cached.status, CacheStatus::Stale { .. }));
    }

    #[tokio::test]
    async fn test_not_found_is_not_masked() {
        let cache = ResultCache::new(Duration::ZERO, Duration::from_secs(600));
        cache.set("k", 1u8).await;
        let err = cache
            .get_or_fetch("k", || async { Err(GitHubError::NotFound("k".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, GitHubError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_transport_failure_without_entry_propagates() {
        let cache: ResultCache<u8> = ResultCache::new(Duration::from_secs(1), Duration::from_secs(1));
        let result = cache
            .get_or_fetch("missing", || async { Err(GitHubError::Transport("dns".into())) })
            .await;
        assert!(matches!(result, Err(GitHubError::Transport(_))));
    }

    #[tokio::test]
    async fn test_prune_drops_past_retention() {
        let cache = ResultCache::new(Duration::from_millis(10), Duration::from_millis(30));
        cache.set("old", 1u8).await;
        sleep(Duration::from_millis(50)).await;
        cache.set("new", 2u8).await;

        assert_eq!(cache.prune().await, 1);
        assert_eq!(cache.len().await, 1);
        assert!(cache.get_retained("old").await.is_none());
    }

    #[test]
    fn test_keys_ignore_owner_case() {
        assert_eq!(branch_key("WordPress", "Hello-Dolly"), "wordpress/hello-dolly");
        assert_ne!(
            tree_key("a", "b", "main", true),
            tree_key("a", "b", "main", false)
        );
    }
}
