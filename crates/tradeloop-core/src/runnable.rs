//! The action seam between the scheduler and task bodies.
//!
//! A task body is anything implementing [`Runnable`]; the scheduler only
//! sees `run() -> Result<(), TaskError>`. Two adapters cover the common
//! cases: [`async_action`] for futures and [`blocking_action`] for
//! synchronous closures, which are offloaded to the blocking pool so they
//! cannot stall the scheduler's tick.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Classified outcome of a failed execution attempt, consumed by the
/// backoff policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Transient failure; the scheduler retries with exponential backoff.
    #[error("retryable task failure: {0}")]
    Retryable(String),
    /// Unrecoverable failure; the task is parked until explicitly
    /// re-enabled.
    #[error("fatal task failure: {0}")]
    Fatal(String),
}

impl TaskError {
    /// A failure worth retrying.
    pub fn retryable(message: impl Into<String>) -> Self {
        TaskError::Retryable(message.into())
    }

    /// A failure that retrying cannot fix.
    pub fn fatal(message: impl Into<String>) -> Self {
        TaskError::Fatal(message.into())
    }

    /// Whether this failure parks the task immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TaskError::Fatal(_))
    }
}

/// A schedulable unit of work.
#[async_trait]
pub trait Runnable: Send + Sync {
    /// Executes one attempt.
    async fn run(&self) -> Result<(), TaskError>;
}

/// Adapter for asynchronous task bodies.
pub struct AsyncAction<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Runnable for AsyncAction<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    async fn run(&self) -> Result<(), TaskError> {
        (self.f)().await
    }
}

/// Adapter for synchronous task bodies, executed via `spawn_blocking`.
pub struct BlockingAction<F> {
    f: Arc<F>,
}

#[async_trait]
impl<F> Runnable for BlockingAction<F>
where
    F: Fn() -> Result<(), TaskError> + Send + Sync + 'static,
{
    async fn run(&self) -> Result<(), TaskError> {
        let f = Arc::clone(&self.f);
        match tokio::task::spawn_blocking(move || f()).await {
            Ok(result) => result,
            // A panic inside the closure surfaces as a join error.
            Err(err) => Err(TaskError::retryable(format!(
                "blocking action panicked: {err}"
            ))),
        }
    }
}

/// Wraps an async closure as a shared [`Runnable`].
pub fn async_action<F, Fut>(f: F) -> Arc<dyn Runnable>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    Arc::new(AsyncAction { f })
}

/// Wraps a synchronous closure as a shared [`Runnable`].
pub fn blocking_action<F>(f: F) -> Arc<dyn Runnable>
where
    F: Fn() -> Result<(), TaskError> + Send + Sync + 'static,
{
    Arc::new(BlockingAction { f: Arc::new(f) })
}
