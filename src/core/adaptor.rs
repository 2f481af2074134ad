//! Lifecycle adaptor middleware.
//!
//! A [`HandlerLayer`] turns one handler into another handler with the same
//! output. [`LifecycleLayer`] is the layer every façade submission goes
//! through: it forwards all calls unchanged and records when the task was
//! wrapped so queue wait and run time can be traced.

use std::time::{Instant, SystemTime};

use tracing::trace;

use super::handler::{HandlerDiagnostic, TaskHandler, WorkerIdentity};

/// A handler-transforming middleware.
pub trait HandlerLayer<H: TaskHandler> {
    /// Handler produced by this layer.
    type Handler: TaskHandler<Output = H::Output>;

    /// Wrap `handler`.
    fn layer(&self, handler: H) -> Self::Handler;
}

/// Layer producing [`LifecycleAdaptor`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct LifecycleLayer;

impl<H: TaskHandler> HandlerLayer<H> for LifecycleLayer {
    type Handler = LifecycleAdaptor<H>;

    fn layer(&self, handler: H) -> Self::Handler {
        lifecycle(handler)
    }
}

/// Wrap a handler in a [`LifecycleAdaptor`].
pub fn lifecycle<H: TaskHandler>(handler: H) -> LifecycleAdaptor<H> {
    LifecycleAdaptor::new(handler)
}

/// Pass-through decorator recording its construction time.
pub struct LifecycleAdaptor<H> {
    inner: H,
    submitted_at: SystemTime,
    created: Instant,
    started: Option<Instant>,
}

impl<H: TaskHandler> LifecycleAdaptor<H> {
    /// Wrap `inner`, stamping the current wall-clock time.
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            submitted_at: SystemTime::now(),
            created: Instant::now(),
            started: None,
        }
    }

    /// Wall-clock time at which the adaptor was created.
    pub const fn submitted_at(&self) -> SystemTime {
        self.submitted_at
    }

    /// Wrapped handler.
    pub const fn inner(&self) -> &H {
        &self.inner
    }

    /// Unwrap the adaptor.
    pub fn into_inner(self) -> H {
        self.inner
    }
}

impl<H: TaskHandler> TaskHandler for LifecycleAdaptor<H> {
    type Output = H::Output;

    fn invoke(&mut self) -> anyhow::Result<Self::Output> {
        self.inner.invoke()
    }

    fn before_execute(&mut self, worker: &WorkerIdentity) {
        let now = Instant::now();
        trace!(
            worker = %worker,
            queued_us = now.duration_since(self.created).as_micros(),
            "task starting"
        );
        self.started = Some(now);
        self.inner.before_execute(worker);
    }

    fn after_execute(&mut self, error: Option<&anyhow::Error>) {
        if let Some(started) = self.started {
            trace!(
                run_us = started.elapsed().as_micros(),
                failed = error.is_some(),
                "task finished"
            );
        }
        self.inner.after_execute(error);
    }

    fn diagnostic(&self) -> HandlerDiagnostic {
        self.inner.diagnostic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Recording {
        before: Arc<AtomicUsize>,
        after_errors: Arc<AtomicUsize>,
    }

    impl TaskHandler for Recording {
        type Output = &'static str;

        fn invoke(&mut self) -> anyhow::Result<&'static str> {
            anyhow::bail!("boom")
        }

        fn before_execute(&mut self, _worker: &WorkerIdentity) {
            self.before.fetch_add(1, Ordering::SeqCst);
        }

        fn after_execute(&mut self, error: Option<&anyhow::Error>) {
            if error.is_some() {
                self.after_errors.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_adaptor_forwards_every_call() {
        let inner = Recording::default();
        let before = Arc::clone(&inner.before);
        let after_errors = Arc::clone(&inner.after_errors);

        let mut adaptor = LifecycleLayer.layer(inner);
        let worker = WorkerIdentity { name: "w-0".into(), index: 0 };
        adaptor.before_execute(&worker);
        let err = adaptor.invoke().unwrap_err();
        adaptor.after_execute(Some(&err));

        assert_eq!(err.to_string(), "boom");
        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(after_errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_adaptor_diagnostic_unwraps_inner() {
        let adaptor = lifecycle(Recording::default());
        assert!(adaptor.diagnostic().type_name.ends_with("Recording"));
    }

    #[test]
    fn test_adaptor_records_construction_time() {
        let before = SystemTime::now();
        let adaptor = lifecycle(Recording::default());
        assert!(adaptor.submitted_at() >= before);
        assert!(adaptor.submitted_at() <= SystemTime::now());
    }
}
