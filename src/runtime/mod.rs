//! Caller-facing surface over the pool core.

pub mod facade;

pub use facade::PoolFacade;
