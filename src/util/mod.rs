//! Shared utilities.

pub mod clock;
pub mod telemetry;

pub use clock::{format_timestamp, now_ms, LONG_FORMAT};
pub use telemetry::init_tracing;
