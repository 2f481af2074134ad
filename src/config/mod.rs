//! Configuration models for pools and their loaders.

pub mod pool;

pub use pool::{PoolConfig, SchedulerConfig};
