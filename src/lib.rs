//! # Prometheus Elastic Pool
//!
//! A thread pool that scales out before it queues.
//!
//! A conventional bounded thread pool only grows past its core size once its
//! queue is completely full, so bursts sit in the queue while the pool stays
//! small. This crate's admission queue refuses work whenever every live
//! worker is already busy and the pool can still grow, forcing a new worker
//! instead; the queue becomes the backstop only once the pool is fully
//! scaled.
//!
//! ## Key Features
//!
//! - **Elastic admission**: grow to the maximum before queueing
//! - **Memory-pressure admission**: optionally refuse work near the memory ceiling
//! - **Lifecycle hooks**: `before_execute`/`after_execute` on the worker thread
//! - **Bounded rejection retry**: a refused task gets one short enqueue retry
//!   before it fails with a logged `CapacityExceeded`
//! - **Configuration**: properties, JSON and environment loaders
//!
//! ## ElasticPool
//!
//! ```rust
//! use prometheus_elastic_pool::config::PoolConfig;
//! use prometheus_elastic_pool::core::{ElasticPool, TaskHandler, WorkerIdentity};
//!
//! struct Resize { width: u32 }
//!
//! impl TaskHandler for Resize {
//!     type Output = u32;
//!
//!     fn invoke(&mut self) -> anyhow::Result<u32> {
//!         Ok(self.width / 2)
//!     }
//!
//!     fn before_execute(&mut self, worker: &WorkerIdentity) {
//!         tracing::info!(worker = %worker, "resizing");
//!     }
//! }
//!
//! let pool = ElasticPool::new(PoolConfig::new().with_core_pool_size(2))?;
//! let handle = pool.submit(Resize { width: 640 })?;
//! assert_eq!(handle.wait()?, 320);
//! # Ok::<(), prometheus_elastic_pool::core::PoolError>(())
//! ```
//!
//! ## PoolFacade
//!
//! For "submit and wait" call sites that would rather log than handle
//! errors, use `runtime::PoolFacade`:
//!
//! ```rust,ignore
//! use prometheus_elastic_pool::runtime::PoolFacade;
//!
//! let facade = PoolFacade::load("conf/thread-pool.properties")?;
//! let width: Option<u32> = facade.execute_for_result(Resize { width: 640 });
//! ```
//!
//! For complete examples, see:
//! - `tests/worker_pool_test.rs` - Admission and lifecycle integration tests

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Elastic pool core: handlers, tasks, admission, rejection and workers.
pub mod core;
/// Configuration models and loaders.
pub mod config;
/// Builders to construct pools from configuration.
pub mod builders;
/// Caller-facing façade.
pub mod runtime;
/// Shared utilities.
pub mod util;
