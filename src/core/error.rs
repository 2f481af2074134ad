//! Error types for pool operations.

use thiserror::Error;

/// Errors produced by the elastic pool and its collaborators.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Admission, worker growth and the rejection retry all failed.
    #[error(
        "capacity exceeded: {handler} rejected with {pool_size}/{maximum_pool_size} workers and {queued} queued tasks"
    )]
    CapacityExceeded {
        /// Type name of the rejected handler (or `plain task`).
        handler: String,
        /// Live worker count at rejection time.
        pool_size: usize,
        /// Configured maximum worker count.
        maximum_pool_size: usize,
        /// Queue depth at rejection time.
        queued: usize,
    },

    /// No configuration source could be found.
    #[error("configuration missing: {0}")]
    ConfigMissing(String),

    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A hooked task reached a worker without its handler.
    #[error("task {task_id} carries no handler; lifecycle hooks cannot run")]
    MissingHandler {
        /// Identifier of the offending task.
        task_id: u64,
    },

    /// The task body returned an error or panicked.
    #[error("task failed: {0:#}")]
    TaskFailed(anyhow::Error),

    /// The pool has been shut down.
    #[error("pool has been shut down")]
    PoolShutdown,

    /// Waiting for a task result timed out.
    #[error("operation timed out")]
    Timeout,

    /// Internal error (thread spawn failure, dropped task, etc.).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
