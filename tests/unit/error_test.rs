//! Tests for error types

use prometheus_elastic_pool::core::PoolError;

#[test]
fn test_pool_shutdown_error() {
    let err = PoolError::PoolShutdown;
    assert_eq!(format!("{}", err), "pool has been shut down");
}

#[test]
fn test_config_missing_error() {
    let err = PoolError::ConfigMissing("thread-pool.properties".to_string());
    assert_eq!(format!("{}", err), "configuration missing: thread-pool.properties");
}

#[test]
fn test_missing_handler_error() {
    let err = PoolError::MissingHandler { task_id: 12 };
    assert_eq!(
        format!("{}", err),
        "task 12 carries no handler; lifecycle hooks cannot run"
    );
}

#[test]
fn test_task_failed_keeps_context_chain() {
    let source = anyhow::anyhow!("connection reset").context("fetching report");
    let err = PoolError::TaskFailed(source);
    assert_eq!(format!("{}", err), "task failed: fetching report: connection reset");
}

#[test]
fn test_pool_error_converts_to_anyhow() {
    fn app() -> prometheus_elastic_pool::core::AppResult<()> {
        Err(PoolError::Timeout)?;
        Ok(())
    }
    assert_eq!(app().unwrap_err().to_string(), "operation timed out");
}
