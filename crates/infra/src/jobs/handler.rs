//! The handler seam between the dispatcher and the work it runs.

use std::future::Future;

use async_trait::async_trait;

use super::types::Job;

/// Work executed for each dispatched job.
///
/// The handler receives a snapshot of the job; the dispatcher keeps the
/// authoritative copy. Any `Err` (or panic) counts as a failed attempt.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a `JobHandler`.
#[derive(Debug, Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap `f` so it can be registered with a `JobQueue`.
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> JobHandler for HandlerFn<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, job: Job) -> anyhow::Result<()> {
        (self.f)(job).await
    }
}
