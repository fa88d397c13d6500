use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::RateLimits;

/// Which budget a limit belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateWindow {
    /// Short burst window
    Minute,
    /// Long per-user budget
    Global,
}

impl RateWindow {
    /// Key prefix used in the counter store
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Global => "global",
        }
    }
}

impl fmt::Display for RateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request budget over a sliding window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimit {
    /// Budget this limit belongs to
    pub scope: RateWindow,
    /// Requests admitted within the window
    pub requests: usize,
    /// Window length
    pub window: Duration,
}

/// Result of consulting the limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The request was admitted and counted against every window
    Allowed,
    /// At least one window is exhausted; nothing was counted
    Exceeded {
        /// Time until every exhausted window admits again
        retry_after: Duration,
        /// The window that holds the request back the longest
        window: RateWindow,
    },
}

impl RateLimitDecision {
    /// Whether the request was admitted
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Shared counter storage behind the limiter
///
/// Implementations must perform the whole check-and-consume for all limits
/// as one atomic step.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Admits and records a request for `subject` if every limit allows it
    async fn check_and_consume(&self, subject: &str, limits: &[WindowLimit]) -> RateLimitDecision;

    /// Drops timestamps older than `horizon`; returns how many keys were removed
    async fn cleanup(&self, horizon: Duration) -> usize;
}

/// In-process sliding log, one timestamp list per `"{scope}:{subject}"`
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    state: Mutex<HashMap<String, Vec<Instant>>>,
}

impl InMemoryRateLimitStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked keys
    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    /// Whether no keys are tracked
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn check_and_consume(&self, subject: &str, limits: &[WindowLimit]) -> RateLimitDecision {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let mut blocked: Option<(Duration, RateWindow)> = None;

        for limit in limits {
            let key = format!("{}:{}", limit.scope, subject);
            let log = state.entry(key).or_default();
            log.retain(|&t| now.duration_since(t) < limit.window);

            if log.len() >= limit.requests {
                // A slot frees up when the request `requests` places back expires.
                let wait = match log.len().checked_sub(limit.requests).and_then(|i| log.get(i)) {
                    Some(&freeing) => (freeing + limit.window).saturating_duration_since(now),
                    None => limit.window,
                }
                .max(Duration::from_millis(1));
                if blocked.map_or(true, |(current, _)| wait > current) {
                    blocked = Some((wait, limit.scope));
                }
            }
        }

        match blocked {
            Some((retry_after, window)) => RateLimitDecision::Exceeded {
                retry_after,
                window,
            },
            None => {
                for limit in limits {
                    let key = format!("{}:{}", limit.scope, subject);
                    state.entry(key).or_default().push(now);
                }
                RateLimitDecision::Allowed
            }
        }
    }

    async fn cleanup(&self, horizon: Duration) -> usize {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let before = state.len();
        state.retain(|_, log| {
            log.retain(|&t| now.duration_since(t) < horizon);
            !log.is_empty()
        });
        before - state.len()
    }
}

/// Per-user request budget consulted before outbound GitHub calls
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    limits: Vec<WindowLimit>,
}

impl RateLimiter {
    /// Creates a limiter over an in-memory store with the configured windows
    pub fn new(config: &RateLimits) -> Self {
        Self::with_store(Arc::new(InMemoryRateLimitStore::new()), config)
    }

    /// Creates a limiter over a caller-provided store
    pub fn with_store(store: Arc<dyn RateLimitStore>, config: &RateLimits) -> Self {
        Self {
            store,
            limits: vec![
                WindowLimit {
                    scope: RateWindow::Minute,
                    requests: config.per_minute as usize,
                    window: Duration::from_secs(config.minute_window_secs),
                },
                WindowLimit {
                    scope: RateWindow::Global,
                    requests: config.global as usize,
                    window: Duration::from_secs(config.global_window_secs),
                },
            ],
        }
    }

    /// Replaces the limit for a window
    pub fn set_limit(&mut self, scope: RateWindow, requests: usize, window: Duration) {
        self.limits.retain(|l| l.scope != scope);
        self.limits.push(WindowLimit {
            scope,
            requests,
            window,
        });
    }

    /// Configured limits
    pub fn limits(&self) -> &[WindowLimit] {
        &self.limits
    }

    /// Checks and consumes one request for a user
    pub async fn check(&self, user_id: i64) -> RateLimitDecision {
        let decision = self
            .store
            .check_and_consume(&user_id.to_string(), &self.limits)
            .await;

        if let RateLimitDecision::Exceeded {
            retry_after,
            window,
        } = decision
        {
            warn!(
                user_id,
                window = window.as_str(),
                retry_after_ms = retry_after.as_millis() as u64,
                "Rate limit exceeded"
            );
        }
        decision
    }

    /// Prunes keys whose timestamps have all left the longest window
    pub async fn cleanup(&self) -> usize {
        let horizon = self
            .limits
            .iter()
            .map(|l| l.window)
            .max()
            .unwrap_or_default();
        let removed = self.store.cleanup(horizon).await;
        if removed > 0 {
            debug!("Pruned {} idle rate limit keys", removed);
        }
        removed
    }
}
