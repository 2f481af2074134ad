//! Tests for utility functions

use chrono::{FixedOffset, TimeZone};
use prometheus_elastic_pool::util::{format_timestamp, init_tracing, now_ms, LONG_FORMAT};

#[test]
fn test_long_format_layout() {
    assert_eq!(LONG_FORMAT, "%Y-%m-%d %H:%M:%S");
}

#[test]
fn test_format_timestamp_ignores_offset() {
    let offset = FixedOffset::east_opt(8 * 3600).unwrap();
    let at = offset.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
    assert_eq!(format_timestamp(at), "2021-03-04 05:06:07");
}

#[test]
fn test_now_ms_is_monotonic_enough() {
    let a = now_ms();
    let b = now_ms();
    assert!(b >= a);
    assert!(a > 1_600_000_000_000);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!("tracing initialised twice without panicking");
}
