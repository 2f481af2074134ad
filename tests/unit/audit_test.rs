//! Tests for rejection diagnostics

use prometheus_elastic_pool::core::{
    build_rejection_event, HandlerDiagnostic, InMemoryRejectionSink, RejectionSink, PLAIN_TASK,
};

#[test]
fn test_rejection_event_fields() {
    let diag = HandlerDiagnostic::of::<Vec<u8>>("thumbnail batch 3");
    let event = build_rejection_event(42, "media-", Some(diag), "capacity exceeded");

    assert_eq!(event.task_id, 42);
    assert_eq!(event.pool, "media-");
    assert!(event.handler_type.contains("Vec<u8>"));
    assert_eq!(event.rendering, "thumbnail batch 3");
    assert_eq!(event.reason, "capacity exceeded");
    assert!(event.created_at_ms > 0);
    assert!(!event.event_id.is_empty());
}

#[test]
fn test_event_ids_are_unique() {
    let a = build_rejection_event(1, "p", None, "r");
    let b = build_rejection_event(1, "p", None, "r");
    assert_ne!(a.event_id, b.event_id);
    assert_eq!(a.handler_type, PLAIN_TASK);
}

#[test]
fn test_in_memory_sink_records() {
    let sink = InMemoryRejectionSink::new(10);
    assert!(sink.is_empty());
    sink.record(&build_rejection_event(1, "p", None, "memory pressure"));
    assert_eq!(sink.len(), 1);
    assert_eq!(sink.events()[0].reason, "memory pressure");
}
