//! Elastic pool core: handlers, tasks, admission, rejection and workers.

pub mod adaptor;
pub mod admission_queue;
pub mod audit;
pub mod error;
pub mod handler;
pub mod memory;
pub mod rejection;
pub mod task;
pub mod worker_pool;

pub use adaptor::{lifecycle, HandlerLayer, LifecycleAdaptor, LifecycleLayer};
pub use admission_queue::{Admission, ElasticQueue, ForceOfferError, PoolView, QueueView, Take};
pub use audit::{
    build_rejection_event, InMemoryRejectionSink, RejectionEvent, RejectionSink,
    TracingRejectionSink, PLAIN_TASK,
};
pub use error::{AppResult, PoolError};
pub use handler::{HandlerDiagnostic, TaskHandler, WorkerIdentity};
pub use memory::{
    ManualMemoryGauge, MemoryGauge, MemoryPressure, MemoryUsage, ProcessMemoryGauge,
};
pub use rejection::RejectionHandler;
pub use task::{PlainWork, SubmittedWork, Task, TaskHandle};
pub use worker_pool::{ElasticPool, InFlightCounter, PoolStats, ThreadFactory};
