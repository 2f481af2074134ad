//! Elastic worker pool.
//!
//! Workers are OS threads pulling from one shared [`ElasticQueue`]. The pool
//! grows eagerly up to its core size, then lets the queue decide between
//! queueing and growing further, and falls back to the rejection handler
//! when both are exhausted.
//!
//! # Example
//!
//! ```rust
//! use prometheus_elastic_pool::config::PoolConfig;
//! use prometheus_elastic_pool::core::ElasticPool;
//!
//! let pool = ElasticPool::new(
//!     PoolConfig::new()
//!         .with_core_pool_size(2)
//!         .with_maximum_pool_size(4)
//!         .with_initial_capacity(16),
//! )?;
//!
//! let handle = pool.execute(|| Ok(6 * 7))?;
//! assert_eq!(handle.wait()?, 42);
//! pool.shutdown();
//! # Ok::<(), prometheus_elastic_pool::core::PoolError>(())
//! ```
//!
//! [`ElasticQueue`]: crate::core::ElasticQueue

mod native;
pub mod thread_factory;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tracing::error;

pub use native::ElasticPool;
pub use thread_factory::ThreadFactory;

/// Count of tasks accepted but not yet terminally finished.
///
/// Incremented once per accepted submission; decremented once per terminal
/// outcome (completion, abort, abandonment or final rejection).
#[derive(Debug, Default)]
pub struct InFlightCounter(AtomicUsize);

impl InFlightCounter {
    /// Record an accepted submission.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    /// Record a terminal outcome. Never goes below zero.
    pub fn decrement(&self) {
        let underflow = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_err();
        if underflow {
            error!("in-flight counter decremented below zero; ignoring");
        }
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Live worker threads.
    pub pool_size: usize,
    /// Highest live worker count observed.
    pub largest_pool_size: usize,
    /// Configured core worker count.
    pub core_pool_size: usize,
    /// Configured maximum worker count.
    pub maximum_pool_size: usize,
    /// Tasks accepted but not yet finished.
    pub in_flight: usize,
    /// Tasks waiting in the queue.
    pub queued: usize,
    /// Tasks currently executing.
    pub active: usize,
    /// Total tasks accepted for admission.
    pub submitted: u64,
    /// Tasks whose body returned `Ok`.
    pub completed: u64,
    /// Tasks whose body failed or panicked, or that were aborted.
    pub failed: u64,
    /// Tasks terminally rejected.
    pub rejected: u64,
    /// Queued tasks abandoned by `shutdown_now`.
    pub abandoned: u64,
}

/// Internal counters for pool statistics.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active: AtomicUsize,
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub rejected: AtomicU64,
    pub abandoned: AtomicU64,
}

impl PoolCounters {
    /// Counter fields of a stats snapshot; gauges are left at zero.
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            active: self.active.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            ..PoolStats::default()
        }
    }
}

/// Pool lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub(crate) enum RunState {
    /// Accepting submissions.
    Running = 0,
    /// Refusing submissions; queued work drains.
    ShuttingDown = 1,
    /// Refusing submissions; queued work was abandoned.
    Stopped = 2,
}

impl RunState {
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::ShuttingDown,
            _ => Self::Stopped,
        }
    }
}
