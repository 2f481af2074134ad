//! Convenience façade over one [`ElasticPool`].
//!
//! Every submission goes through [`LifecycleLayer`] exactly once. Failures
//! of the "submit and wait" calls are logged and swallowed: the caller gets
//! `None`, never an error.

use std::path::Path;
use std::time::Duration;

use tracing::error;

use crate::config::PoolConfig;
use crate::core::{
    ElasticPool, HandlerLayer, LifecycleAdaptor, LifecycleLayer, PoolError, TaskHandle,
    TaskHandler,
};

/// Owned façade; create one per pool, no process-wide instance exists.
#[derive(Debug)]
pub struct PoolFacade {
    pool: ElasticPool,
    result_timeout: Duration,
    layer: LifecycleLayer,
}

impl PoolFacade {
    /// Build the pool described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let result_timeout = config.result_timeout();
        Ok(Self::from_pool(ElasticPool::new(config)?, result_timeout))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: ElasticPool, result_timeout: Duration) -> Self {
        Self {
            pool,
            result_timeout,
            layer: LifecycleLayer,
        }
    }

    /// Load configuration from `path` and build the pool.
    ///
    /// # Errors
    ///
    /// `PoolError::ConfigMissing` if the file cannot be read; otherwise as
    /// [`new`](Self::new).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PoolError> {
        Self::new(PoolConfig::load(path)?)
    }

    /// Load configuration from `ELASTIC_POOL_*` variables and build the pool.
    ///
    /// # Errors
    ///
    /// `PoolError::ConfigMissing` if no variable is set; otherwise as
    /// [`new`](Self::new).
    pub fn from_env() -> Result<Self, PoolError> {
        Self::new(PoolConfig::from_env()?)
    }

    fn wrap<H: TaskHandler>(&self, handler: H) -> LifecycleAdaptor<H> {
        self.layer.layer(handler)
    }

    /// Submit and block for the result, up to the configured result timeout.
    ///
    /// Returns `None` when the task was rejected, failed or timed out; the
    /// cause is logged. A timed-out task keeps running.
    pub fn execute_for_result<H: TaskHandler>(&self, handler: H) -> Option<H::Output> {
        let handle = self.execute_async(handler).ok()?;
        self.settle(handle.id(), handle.wait_timeout(self.result_timeout))
    }

    /// Submit and return the task handle without waiting.
    ///
    /// # Errors
    ///
    /// - `PoolError::PoolShutdown` if the pool is not running
    /// - `PoolError::CapacityExceeded` if the task was terminally rejected
    pub fn execute_async<H: TaskHandler>(
        &self,
        handler: H,
    ) -> Result<TaskHandle<H::Output>, PoolError> {
        self.pool.submit(self.wrap(handler)).inspect_err(|e| {
            error!(pool = %self.pool.name(), error = %e, "thread pool submission failed");
        })
    }

    /// Async variant of [`execute_for_result`](Self::execute_for_result); the
    /// wait runs on tokio's blocking pool.
    #[cfg(feature = "tokio-runtime")]
    pub async fn execute_for_result_async<H: TaskHandler>(&self, handler: H) -> Option<H::Output> {
        let handle = self.execute_async(handler).ok()?;
        let task_id = handle.id();
        let result = handle.join_async(self.result_timeout).await;
        self.settle(task_id, result)
    }

    fn settle<T>(&self, task_id: u64, result: Result<T, PoolError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                error!(pool = %self.pool.name(), task_id, error = %e, "thread pool execution failed");
                None
            }
        }
    }

    /// Configured wait for [`execute_for_result`](Self::execute_for_result).
    #[must_use]
    pub const fn result_timeout(&self) -> Duration {
        self.result_timeout
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &ElasticPool {
        &self.pool
    }

    /// Stop accepting submissions and let queued work drain.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}
