//! Rejection handling for tasks that could be neither queued nor given a
//! new worker.
//!
//! Protocol: unless discard-on-pressure is enabled and pressure is present,
//! retry a direct enqueue for a few milliseconds (the refusal may just have
//! lost a race with a worker draining the queue). If that fails too, record
//! the rejection, compensate the in-flight counter and fail the submission.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::admission_queue::{ElasticQueue, PoolView};
use super::audit::{build_rejection_event, RejectionSink, TracingRejectionSink};
use super::error::PoolError;
use super::memory::MemoryPressure;
use super::task::Task;
use super::worker_pool::InFlightCounter;

/// Terminal step of the admission path.
#[derive(Clone)]
pub struct RejectionHandler {
    pool_name: String,
    retry_window: Duration,
    // Some iff discard-on-memory-pressure is enabled.
    pressure: Option<MemoryPressure>,
    sinks: Vec<Arc<dyn RejectionSink>>,
}

impl fmt::Debug for RejectionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RejectionHandler")
            .field("pool_name", &self.pool_name)
            .field("retry_window", &self.retry_window)
            .field("discard_on_pressure", &self.pressure.is_some())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl RejectionHandler {
    /// Handler logging through `tracing`. Pass `pressure` only when
    /// discard-on-memory-pressure is enabled.
    pub fn new(
        pool_name: impl Into<String>,
        retry_window: Duration,
        pressure: Option<MemoryPressure>,
    ) -> Self {
        Self {
            pool_name: pool_name.into(),
            retry_window,
            pressure,
            sinks: vec![Arc::new(TracingRejectionSink)],
        }
    }

    /// Also record rejections into `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn RejectionSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Bounded wait of the retry.
    #[must_use]
    pub const fn retry_window(&self) -> Duration {
        self.retry_window
    }

    fn should_retry(&self) -> bool {
        self.pressure
            .as_ref()
            .is_none_or(|pressure| !pressure.is_under_pressure())
    }

    /// Handle a refused task.
    ///
    /// # Errors
    ///
    /// - `PoolError::CapacityExceeded` when the retry failed or was skipped
    /// - `PoolError::PoolShutdown` when the retry failed because the pool is
    ///   shutting down
    pub(crate) fn reject(
        &self,
        task: Task,
        queue: &ElasticQueue,
        pool: &dyn PoolView,
        in_flight: &InFlightCounter,
    ) -> Result<(), PoolError> {
        let retry = self.should_retry();
        let mut shutting_down = false;
        let task = if retry {
            match queue.force_offer(task, self.retry_window) {
                Ok(()) => {
                    debug!(pool = %self.pool_name, "refused task re-queued by rejection retry");
                    return Ok(());
                }
                Err(refused) => {
                    shutting_down = refused.is_shutdown();
                    refused.into_task()
                }
            }
        } else {
            task
        };

        let reason = if shutting_down {
            "pool is shutting down"
        } else if !retry {
            "memory pressure"
        } else {
            "capacity exceeded"
        };
        let event = build_rejection_event(task.id(), &self.pool_name, task.diagnostic(), reason);
        for sink in &self.sinks {
            sink.record(&event);
        }

        in_flight.decrement();
        drop(task);

        if shutting_down {
            return Err(PoolError::PoolShutdown);
        }
        Err(PoolError::CapacityExceeded {
            handler: event.handler_type,
            pool_size: pool.pool_size(),
            maximum_pool_size: pool.maximum_pool_size(),
            queued: queue.len(),
        })
    }
}
