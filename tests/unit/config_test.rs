//! Tests for configuration loading and validation

use std::time::Duration;

use prometheus_elastic_pool::config::{PoolConfig, SchedulerConfig};
use prometheus_elastic_pool::core::PoolError;

#[test]
fn test_pool_config_validation() {
    let valid = PoolConfig::new()
        .with_core_pool_size(2)
        .with_maximum_pool_size(4)
        .with_initial_capacity(10);
    assert!(valid.validate().is_ok());
}

#[test]
fn test_pool_config_invalid_maximum() {
    let invalid = PoolConfig::new()
        .with_core_pool_size(0)
        .with_maximum_pool_size(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_pool_config_core_above_maximum() {
    let invalid = PoolConfig::new()
        .with_core_pool_size(8)
        .with_maximum_pool_size(4);
    assert!(invalid.validate().unwrap_err().contains("corePoolSize"));
}

#[test]
fn test_pool_config_invalid_capacity() {
    let invalid = PoolConfig::new().with_initial_capacity(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_pool_config_invalid_threshold() {
    assert!(PoolConfig::new().with_memory_threshold(0.0).validate().is_err());
    assert!(PoolConfig::new().with_memory_threshold(1.5).validate().is_err());
    assert!(PoolConfig::new().with_memory_threshold(1.0).validate().is_ok());
}

#[test]
fn test_pool_config_invalid_thread_name() {
    assert!(PoolConfig::new().with_thread_name("").validate().is_err());
    assert!(PoolConfig::new().with_thread_name("bad\0name").validate().is_err());
}

#[test]
fn test_properties_loader() {
    let text = "\
# thread pool
corePoolSize=3
maximumPoolSize = 6
initialCapacity=100
keepAliveTime=30
threadName=report-worker-
discard=true
memoryThreshold: 0.75
";
    let cfg = PoolConfig::from_properties_str(text).unwrap();
    assert_eq!(cfg.core_pool_size, 3);
    assert_eq!(cfg.maximum_pool_size, 6);
    assert_eq!(cfg.initial_capacity, 100);
    assert_eq!(cfg.keep_alive(), Duration::from_secs(30));
    assert_eq!(cfg.thread_name, "report-worker-");
    assert!(cfg.discard);
    assert!((cfg.memory_threshold - 0.75).abs() < f64::EPSILON);
    assert_eq!(cfg.result_timeout(), Duration::from_secs(10));
}

#[test]
fn test_properties_malformed_line() {
    let err = PoolConfig::from_properties_str("corePoolSize").unwrap_err();
    assert!(matches!(err, PoolError::InvalidConfig(_)));
}

#[test]
fn test_json_loader_uses_camel_case() {
    let cfg = PoolConfig::from_json_str(
        r#"{"corePoolSize":1,"maximumPoolSize":2,"rejectionRetryMillis":7}"#,
    )
    .unwrap();
    assert_eq!(cfg.core_pool_size, 1);
    assert_eq!(cfg.rejection_retry(), Duration::from_millis(7));
    assert_eq!(cfg.initial_capacity, 20_000);
}

#[test]
fn test_load_missing_file_is_config_missing() {
    let path = std::env::temp_dir().join(format!("{}.properties", uuid::Uuid::new_v4()));
    let err = PoolConfig::load(&path).unwrap_err();
    assert!(matches!(err, PoolError::ConfigMissing(_)));
}

#[test]
fn test_load_dispatches_on_extension() {
    let dir = std::env::temp_dir();
    let json = dir.join(format!("{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&json, r#"{"threadName":"json-"}"#).unwrap();
    let props = dir.join(format!("{}.properties", uuid::Uuid::new_v4()));
    std::fs::write(&props, "threadName=props-\n").unwrap();

    assert_eq!(PoolConfig::load(&json).unwrap().thread_name, "json-");
    assert_eq!(PoolConfig::load(&props).unwrap().thread_name, "props-");

    let _ = std::fs::remove_file(json);
    let _ = std::fs::remove_file(props);
}

#[test]
fn test_scheduler_config_requires_pools() {
    let err = SchedulerConfig::from_json_str(r#"{"pools":{}}"#).unwrap_err();
    assert!(err.to_string().contains("at least one pool"));
}

#[test]
fn test_scheduler_config_names_invalid_pool() {
    let err = SchedulerConfig::from_json_str(r#"{"pools":{"bulk":{"maximumPoolSize":0}}}"#)
        .unwrap_err();
    assert!(err.to_string().contains("bulk"));
}
