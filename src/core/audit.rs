//! Rejection diagnostics sinks.
//!
//! Every terminal rejection produces one [`RejectionEvent`]. The tracing sink
//! is always installed; additional sinks (e.g. the in-memory one used by
//! tests and dashboards) can be attached through the pool builder.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::warn;

use crate::core::handler::HandlerDiagnostic;
use crate::util::clock::{format_timestamp, now_ms};

/// Handler type reported for tasks submitted without a handler.
pub const PLAIN_TASK: &str = "plain task";

/// A terminally rejected submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectionEvent {
    /// Event identifier.
    pub event_id: String,
    /// Rejected task identifier.
    pub task_id: u64,
    /// Pool the task was submitted to (its thread name prefix).
    pub pool: String,
    /// Type name of the underlying handler, or [`PLAIN_TASK`].
    pub handler_type: String,
    /// Human-readable rendering of the rejected unit.
    pub rendering: String,
    /// Local time of rejection, `yyyy-MM-dd HH:mm:ss`.
    pub happened_at: String,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Why the task was rejected.
    pub reason: String,
}

/// Rejection sink abstraction.
pub trait RejectionSink: Send + Sync {
    /// Record a rejection event.
    fn record(&self, event: &RejectionEvent);
}

/// Sink writing rejections to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRejectionSink;

impl RejectionSink for TracingRejectionSink {
    fn record(&self, event: &RejectionEvent) {
        warn!(
            event_id = %event.event_id,
            task_id = event.task_id,
            pool = %event.pool,
            handler = %event.handler_type,
            happened_at = %event.happened_at,
            task = %event.rendering,
            reason = %event.reason,
            "pool reached queue capacity; task rejected"
        );
    }
}

/// In-memory rejection sink with a bounded buffer.
#[derive(Debug)]
pub struct InMemoryRejectionSink {
    events: Mutex<VecDeque<RejectionEvent>>,
    max_events: usize,
}

impl InMemoryRejectionSink {
    /// Create a sink keeping at most `max_events` events.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events)),
            max_events,
        }
    }

    /// Snapshot of stored events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<RejectionEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Number of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether no event has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl RejectionSink for InMemoryRejectionSink {
    fn record(&self, event: &RejectionEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event.clone());
    }
}

/// Build a rejection event; `diagnostic` is `None` for plain tasks.
pub fn build_rejection_event(
    task_id: u64,
    pool: impl Into<String>,
    diagnostic: Option<HandlerDiagnostic>,
    reason: impl Into<String>,
) -> RejectionEvent {
    let (handler_type, rendering) = diagnostic.map_or_else(
        || (PLAIN_TASK.to_owned(), format!("task #{task_id}")),
        |d| (d.type_name.to_owned(), d.rendering),
    );
    RejectionEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        task_id,
        pool: pool.into(),
        handler_type,
        rendering,
        happened_at: format_timestamp(chrono::Local::now()),
        created_at_ms: now_ms(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_task_event_is_generic() {
        let event = build_rejection_event(7, "pool-", None, "capacity exceeded");
        assert_eq!(event.handler_type, PLAIN_TASK);
        assert_eq!(event.rendering, "task #7");
        assert_eq!(event.happened_at.len(), "yyyy-MM-dd HH:mm:ss".len());
    }

    #[test]
    fn test_hooked_event_carries_diagnostic() {
        let diag = HandlerDiagnostic::of::<String>("report for tenant 9");
        let event = build_rejection_event(1, "pool-", Some(diag), "capacity exceeded");
        assert_eq!(event.handler_type, "alloc::string::String");
        assert_eq!(event.rendering, "report for tenant 9");
    }

    #[test]
    fn test_in_memory_sink_is_bounded() {
        let sink = InMemoryRejectionSink::new(2);
        for id in 0..3 {
            sink.record(&build_rejection_event(id, "p", None, "r"));
        }
        let ids: Vec<u64> = sink.events().iter().map(|e| e.task_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
