use std::future::Future;

use futures::stream::{self, StreamExt};

/// Runs futures with a concurrency ceiling, yielding results in input order
///
/// Nothing is spawned: dropping the future returned by [`process`] drops every
/// in-flight task with it.
///
/// [`process`]: ParallelProcessor::process
#[derive(Debug, Clone, Copy)]
pub struct ParallelProcessor {
    max_concurrent: usize,
}

impl ParallelProcessor {
    /// Creates a new parallel processor with the specified concurrency limit
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Concurrency ceiling
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Processes a collection of futures concurrently and returns their results
    pub async fn process<I, F, T, E>(&self, tasks: I) -> Vec<Result<T, E>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, E>>,
    {
        stream::iter(tasks)
            .buffered(self.max_concurrent)
            .collect()
            .await
    }
}
