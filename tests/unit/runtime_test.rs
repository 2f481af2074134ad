//! Tests for the pool façade

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use prometheus_elastic_pool::config::PoolConfig;
use prometheus_elastic_pool::core::{HandlerDiagnostic, TaskHandler, WorkerIdentity};
use prometheus_elastic_pool::runtime::PoolFacade;

struct Render {
    page: u32,
    hooks: Arc<AtomicUsize>,
}

impl TaskHandler for Render {
    type Output = String;

    fn invoke(&mut self) -> anyhow::Result<String> {
        if self.page == 0 {
            anyhow::bail!("page numbers start at 1");
        }
        Ok(format!("page {}", self.page))
    }

    fn before_execute(&mut self, _worker: &WorkerIdentity) {
        self.hooks.fetch_add(1, Ordering::SeqCst);
    }

    fn after_execute(&mut self, _error: Option<&anyhow::Error>) {
        self.hooks.fetch_add(1, Ordering::SeqCst);
    }

    fn diagnostic(&self) -> HandlerDiagnostic {
        HandlerDiagnostic::of::<Self>(format!("render page {}", self.page))
    }
}

fn facade() -> PoolFacade {
    PoolFacade::new(
        PoolConfig::new()
            .with_core_pool_size(2)
            .with_maximum_pool_size(4)
            .with_initial_capacity(16)
            .with_thread_name("facade-")
            .with_result_timeout(Duration::from_secs(5)),
    )
    .unwrap()
}

#[test]
fn test_execute_for_result() {
    let facade = facade();
    let hooks = Arc::new(AtomicUsize::new(0));
    let page = facade.execute_for_result(Render { page: 3, hooks: Arc::clone(&hooks) });
    assert_eq!(page.as_deref(), Some("page 3"));
    assert_eq!(hooks.load(Ordering::SeqCst), 2);
}

#[test]
fn test_failure_is_logged_and_swallowed() {
    let facade = facade();
    let hooks = Arc::new(AtomicUsize::new(0));
    assert_eq!(facade.execute_for_result(Render { page: 0, hooks: Arc::clone(&hooks) }), None);
    assert_eq!(hooks.load(Ordering::SeqCst), 2, "after_execute still runs");
    assert_eq!(facade.pool().in_flight(), 0);
}

#[test]
fn test_execute_async_returns_handle() {
    let facade = facade();
    let hooks = Arc::new(AtomicUsize::new(0));
    let handle = facade.execute_async(Render { page: 8, hooks }).unwrap();
    assert_eq!(handle.wait().unwrap(), "page 8");
}

#[test]
fn test_default_result_timeout() {
    let facade = PoolFacade::new(PoolConfig::new()).unwrap();
    assert_eq!(facade.result_timeout(), Duration::from_secs(10));
}

#[test]
fn test_unbounded_result_timeout_waits_for_result() {
    let config = PoolConfig::from_properties_str(
        "corePoolSize=1\nmaximumPoolSize=1\nresultTimeoutSecs=18446744073709551615\n",
    )
    .unwrap();
    let facade = PoolFacade::new(config).unwrap();
    assert_eq!(facade.result_timeout(), Duration::from_secs(u64::MAX));

    let hooks = Arc::new(AtomicUsize::new(0));
    let page = facade.execute_for_result(Render { page: 2, hooks });
    assert_eq!(page.as_deref(), Some("page 2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_execute_for_result_async() {
    let facade = facade();
    let hooks = Arc::new(AtomicUsize::new(0));
    let page = facade
        .execute_for_result_async(Render { page: 5, hooks: Arc::clone(&hooks) })
        .await;
    assert_eq!(page.as_deref(), Some("page 5"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_join_async_on_many_handles() {
    let facade = facade();
    let handles: Vec<_> = (1..=8)
        .map(|page| {
            facade
                .execute_async(Render { page, hooks: Arc::new(AtomicUsize::new(0)) })
                .unwrap()
        })
        .collect();

    let results = futures::future::join_all(
        handles
            .into_iter()
            .map(|h| h.join_async(Duration::from_secs(5))),
    )
    .await;
    let pages: Vec<String> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(pages.len(), 8);
    assert_eq!(pages[7], "page 8");
}
