use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

use crate::error::IngestError;

/// One-shot retry countdown
///
/// The callback runs at most once, after `delay`, unless the timer is
/// cancelled or dropped first.
#[derive(Debug)]
pub struct RetryTimer {
    handle: JoinHandle<()>,
    fired: Arc<AtomicBool>,
}

impl RetryTimer {
    /// Schedules `callback` to run after `delay`
    pub fn schedule<F>(delay: Duration, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            if !flag.swap(true, Ordering::SeqCst) {
                callback();
            }
        });
        Self { handle, fired }
    }

    /// Schedules a retry using the delay carried by `err`
    ///
    /// Returns `None` when the error has no retry delay.
    pub fn for_error<F>(err: &IngestError, callback: F) -> Option<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let delay = err.retry_after()?;
        debug!("Retry scheduled in {:?}", delay);
        Some(Self::schedule(delay, callback))
    }

    /// Whether the callback has run
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Stops the countdown; returns false if the callback already ran
    pub fn cancel(&self) -> bool {
        let cancelled = !self.fired.swap(true, Ordering::SeqCst);
        self.handle.abort();
        cancelled
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Runs `f`, retrying a single time after a transport failure
///
/// Only `Transport` errors (network failures and GitHub outages) are
/// retried. The wait is a [`RetryTimer`] on the error's own `retry_after`;
/// dropping the returned future cancels it.
pub async fn with_single_retry<F, Fut, T>(f: F) -> Result<T, IngestError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, IngestError>>,
{
    match f().await {
        Err(err @ IngestError::Transport(_)) => {
            let delay = err.retry_after().unwrap_or(Duration::from_secs(2));
            info!("{}; retrying once in {:?}", err, delay);

            let (tx, rx) = oneshot::channel();
            let _timer = RetryTimer::schedule(delay, move || {
                let _ = tx.send(());
            });
            if rx.await.is_err() {
                return Err(err);
            }
            f().await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_timer_fires_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let timer = RetryTimer::schedule(Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sleep(Duration::from_millis(80)).await;
        assert!(timer.has_fired());
        assert!(!timer.cancel());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_timer_never_fires() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let timer = RetryTimer::schedule(Duration::from_millis(30), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(timer.cancel());
        sleep(Duration::from_millis(80)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_for_error_needs_a_delay() {
        assert!(RetryTimer::for_error(&IngestError::validation("bad"), || {}).is_none());
        let timer = RetryTimer::for_error(&IngestError::rate_limited(Duration::from_secs(60)), || {});
        assert!(timer.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_retry_on_transport() {
        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let result = with_single_retry(|| async move {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(IngestError::Transport("connection reset".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_retry_after_github_outage() {
        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let result = with_single_retry(|| async move {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(IngestError::from(crate::github::GitHubError::api_error(
                    503,
                    "Service Unavailable",
                )))
            } else {
                Ok("trunk")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "trunk");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_the_retry_cancels_it() {
        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let pending = with_single_retry(|| async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(IngestError::Transport("connection reset".into()))
        });

        let outcome = tokio::time::timeout(Duration::from_millis(500), pending).await;
        assert!(outcome.is_err());
        sleep(Duration::from_secs(5)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_retry_for_other_errors() {
        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let result: Result<(), _> = with_single_retry(|| async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(IngestError::NotFound("octocat/missing".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
