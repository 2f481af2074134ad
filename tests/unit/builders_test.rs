//! Tests for pool builders

use std::sync::Arc;

use prometheus_elastic_pool::builders::{build_pools, ElasticPoolBuilder};
use prometheus_elastic_pool::config::{PoolConfig, SchedulerConfig};
use prometheus_elastic_pool::core::{ManualMemoryGauge, PoolError};

#[test]
fn test_builder_rejects_invalid_config() {
    let err = ElasticPoolBuilder::new(PoolConfig::new().with_initial_capacity(0))
        .build()
        .unwrap_err();
    assert!(matches!(err, PoolError::InvalidConfig(_)));
}

#[test]
fn test_builder_ignores_gauge_without_discard() {
    let gauge = Arc::new(ManualMemoryGauge::new(1_000, Some(1_000)));
    let pool = ElasticPoolBuilder::new(
        PoolConfig::new()
            .with_core_pool_size(1)
            .with_maximum_pool_size(1)
            .with_initial_capacity(4),
    )
    .memory_gauge(gauge)
    .build()
    .unwrap();

    let first = pool.execute(|| Ok(1)).unwrap();
    let second = pool.execute(|| Ok(2)).unwrap();
    assert_eq!(first.wait().unwrap() + second.wait().unwrap(), 3);
}

#[test]
fn test_build_pools_names_each_pool() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{"pools":{
            "reports":{"corePoolSize":1,"maximumPoolSize":2,"threadName":"reports-"},
            "mail":{"corePoolSize":0,"maximumPoolSize":1,"threadName":"mail-"}
        }}"#,
    )
    .unwrap();
    let pools = build_pools(&cfg).unwrap();
    assert_eq!(pools["reports"].name(), "reports-");
    assert_eq!(pools["mail"].stats().core_pool_size, 0);

    let handle = pools["mail"].execute(|| Ok("sent")).unwrap();
    assert_eq!(handle.wait().unwrap(), "sent");
}
