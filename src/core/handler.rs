//! The capability a unit of work must provide to run with lifecycle hooks.

use std::fmt;

/// Identity of the worker thread running a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    /// Thread name (`thread_name` prefix followed by the worker index).
    pub name: String,
    /// Per-pool, monotonically increasing worker index.
    pub index: u64,
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Diagnostic view of a handler, used when a task is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerDiagnostic {
    /// Fully qualified type name of the handler.
    pub type_name: &'static str,
    /// Human-readable rendering of the handler.
    pub rendering: String,
}

impl HandlerDiagnostic {
    /// Diagnostic for a value of type `T` rendered with the given text.
    pub fn of<T: ?Sized>(rendering: impl Into<String>) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            rendering: rendering.into(),
        }
    }
}

/// A unit of work with lifecycle callbacks.
///
/// The pool calls the methods in this order, on the worker thread:
/// `before_execute`, `invoke`, `after_execute`. `after_execute` runs exactly
/// once whether `invoke` succeeded, failed or panicked; on failure it receives
/// the error by reference before the error is delivered to the task handle.
///
/// # Example
///
/// ```rust
/// use prometheus_elastic_pool::core::{TaskHandler, WorkerIdentity};
///
/// struct Checksum(Vec<u8>);
///
/// impl TaskHandler for Checksum {
///     type Output = u32;
///
///     fn invoke(&mut self) -> anyhow::Result<u32> {
///         Ok(self.0.iter().map(|b| u32::from(*b)).sum())
///     }
///
///     fn before_execute(&mut self, worker: &WorkerIdentity) {
///         tracing::debug!(worker = %worker, "checksum starting");
///     }
/// }
/// ```
pub trait TaskHandler: Send + 'static {
    /// Result produced by the task body.
    type Output: Send + 'static;

    /// Run the task body.
    ///
    /// # Errors
    ///
    /// Any error is captured by the worker, passed to `after_execute` and then
    /// surfaced through the task handle as `PoolError::TaskFailed`.
    fn invoke(&mut self) -> anyhow::Result<Self::Output>;

    /// Called on the worker thread immediately before `invoke`.
    fn before_execute(&mut self, _worker: &WorkerIdentity) {}

    /// Called on the worker thread immediately after `invoke` returns.
    fn after_execute(&mut self, _error: Option<&anyhow::Error>) {}

    /// Describe this handler for rejection diagnostics.
    fn diagnostic(&self) -> HandlerDiagnostic {
        let name = std::any::type_name::<Self>();
        HandlerDiagnostic {
            type_name: name,
            rendering: name.to_owned(),
        }
    }
}

impl<H: TaskHandler + ?Sized> TaskHandler for Box<H> {
    type Output = H::Output;

    fn invoke(&mut self) -> anyhow::Result<Self::Output> {
        (**self).invoke()
    }

    fn before_execute(&mut self, worker: &WorkerIdentity) {
        (**self).before_execute(worker);
    }

    fn after_execute(&mut self, error: Option<&anyhow::Error>) {
        (**self).after_execute(error);
    }

    fn diagnostic(&self) -> HandlerDiagnostic {
        (**self).diagnostic()
    }
}
