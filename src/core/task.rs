//! Task wrapper binding submitted work to the handle the caller waits on.
//!
//! Submitted work is resolved once, at submission, into either a plain
//! closure (no hooks) or a hooked [`TaskHandler`]. The worker drives a task
//! through `before_execute`, `run`, `after_execute` and `finish`; the result
//! lands in a slot shared with the caller's [`TaskHandle`].

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::error::PoolError;
use super::handler::{HandlerDiagnostic, TaskHandler, WorkerIdentity};

/// Boxed closure submitted without lifecycle hooks.
pub type PlainWork<T> = Box<dyn FnOnce() -> anyhow::Result<T> + Send>;

/// Work handed to the pool, resolved at the submission boundary.
pub enum SubmittedWork<T: Send + 'static> {
    /// A closure with no lifecycle hooks.
    Plain(PlainWork<T>),
    /// A handler whose hooks run around the body.
    Hooked(Box<dyn TaskHandler<Output = T>>),
}

impl<T: Send + 'static> fmt::Debug for SubmittedWork<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("Plain"),
            Self::Hooked(h) => write!(f, "Hooked({})", h.diagnostic().type_name),
        }
    }
}

/// Result entry state.
enum SlotState<T> {
    /// Waiting for result.
    Pending,
    /// Result is ready.
    Ready(Result<T, PoolError>),
    /// Result was handed to the caller.
    Taken,
}

/// Single-result storage with Condvar-based notification.
struct ResultSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> ResultSlot<T> {
    const fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
            ready: Condvar::new(),
        }
    }

    /// Store a result and wake waiters. Only the first result is kept.
    fn complete(&self, result: Result<T, PoolError>) {
        let mut state = self.state.lock();
        if matches!(*state, SlotState::Pending) {
            *state = SlotState::Ready(result);
            self.ready.notify_all();
        }
    }

    fn take(state: &mut SlotState<T>) -> Option<Result<T, PoolError>> {
        match std::mem::replace(state, SlotState::Taken) {
            SlotState::Ready(result) => Some(result),
            SlotState::Taken => Some(Err(PoolError::Internal("task result already taken".into()))),
            SlotState::Pending => {
                *state = SlotState::Pending;
                None
            }
        }
    }
}

/// Caller's view of a submitted task.
///
/// A handle observes completion or failure; it cannot interrupt the task.
pub struct TaskHandle<T> {
    id: u64,
    slot: Arc<ResultSlot<T>>,
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl<T> TaskHandle<T> {
    /// Task identifier assigned at submission.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Whether a result is available (or was already taken).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        !matches!(*self.slot.state.lock(), SlotState::Pending)
    }

    /// Take the result if it is ready, without blocking.
    pub fn try_take(&self) -> Option<Result<T, PoolError>> {
        ResultSlot::take(&mut self.slot.state.lock())
    }

    /// Block until the task finishes.
    ///
    /// # Errors
    ///
    /// - `PoolError::TaskFailed` if the body returned an error or panicked
    /// - `PoolError::PoolShutdown` if the task was abandoned by `shutdown_now`
    /// - `PoolError::MissingHandler` if the task was built without its handler
    pub fn wait(self) -> Result<T, PoolError> {
        let mut state = self.slot.state.lock();
        loop {
            if let Some(result) = ResultSlot::take(&mut state) {
                return result;
            }
            self.slot.ready.wait(&mut state);
        }
    }

    /// Block until the task finishes or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Same as [`wait`](Self::wait), plus `PoolError::Timeout`. A timeout does
    /// not consume the result; the handle can be waited on again. A timeout
    /// too large to express as a deadline waits without one.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, PoolError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.slot.state.lock();
        loop {
            if let Some(result) = ResultSlot::take(&mut state) {
                return result;
            }
            match deadline {
                Some(deadline) => {
                    if self.slot.ready.wait_until(&mut state, deadline).timed_out() {
                        return ResultSlot::take(&mut state).unwrap_or(Err(PoolError::Timeout));
                    }
                }
                None => self.slot.ready.wait(&mut state),
            }
        }
    }
}

#[cfg(feature = "tokio-runtime")]
impl<T: Send + 'static> TaskHandle<T> {
    /// Wait for the result from async code.
    ///
    /// The Condvar wait is moved onto tokio's blocking pool so the calling
    /// runtime is never blocked.
    ///
    /// # Errors
    ///
    /// Same as [`wait_timeout`](Self::wait_timeout).
    pub async fn join_async(self, timeout: Duration) -> Result<T, PoolError> {
        tokio::task::spawn_blocking(move || self.wait_timeout(timeout))
            .await
            .map_err(|e| PoolError::Internal(format!("join task failed: {e}")))?
    }
}

/// Type-erased view of a task, driven by the worker.
trait Job: Send {
    fn is_hooked(&self) -> bool;
    fn diagnostic(&self) -> Option<HandlerDiagnostic>;
    fn succeeded(&self) -> bool;
    fn before_execute(&mut self, worker: &WorkerIdentity) -> Result<(), PoolError>;
    fn run(&mut self);
    fn after_execute(&mut self) -> Result<(), PoolError>;
    fn finish(self: Box<Self>);
    fn abandon(self: Box<Self>, error: PoolError);
}

enum Work<T: Send + 'static> {
    Plain(Option<PlainWork<T>>),
    Hooked(Option<Box<dyn TaskHandler<Output = T>>>),
}

struct WorkJob<T: Send + 'static> {
    id: u64,
    work: Work<T>,
    outcome: Option<Result<T, PoolError>>,
    slot: Arc<ResultSlot<T>>,
}

impl<T: Send + 'static> WorkJob<T> {
    fn record_body(&mut self, body: std::thread::Result<anyhow::Result<T>>) {
        let outcome = match body {
            Ok(result) => result.map_err(PoolError::TaskFailed),
            Err(payload) => Err(PoolError::TaskFailed(anyhow::anyhow!(
                "task panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };
        self.outcome = Some(outcome);
    }
}

impl<T: Send + 'static> Job for WorkJob<T> {
    fn is_hooked(&self) -> bool {
        matches!(self.work, Work::Hooked(_))
    }

    fn diagnostic(&self) -> Option<HandlerDiagnostic> {
        match &self.work {
            Work::Hooked(Some(handler)) => Some(handler.diagnostic()),
            _ => None,
        }
    }

    fn succeeded(&self) -> bool {
        matches!(self.outcome, Some(Ok(_)))
    }

    fn before_execute(&mut self, worker: &WorkerIdentity) -> Result<(), PoolError> {
        match &mut self.work {
            Work::Plain(_) => Ok(()),
            Work::Hooked(Some(handler)) => {
                handler.before_execute(worker);
                Ok(())
            }
            Work::Hooked(None) => Err(PoolError::MissingHandler { task_id: self.id }),
        }
    }

    fn run(&mut self) {
        let body = match &mut self.work {
            Work::Plain(closure) => match closure.take() {
                Some(closure) => panic::catch_unwind(AssertUnwindSafe(closure)),
                None => {
                    self.outcome = Some(Err(PoolError::Internal(format!(
                        "task {} already ran",
                        self.id
                    ))));
                    return;
                }
            },
            Work::Hooked(Some(handler)) => {
                panic::catch_unwind(AssertUnwindSafe(|| handler.invoke()))
            }
            Work::Hooked(None) => {
                self.outcome = Some(Err(PoolError::MissingHandler { task_id: self.id }));
                return;
            }
        };
        self.record_body(body);
    }

    fn after_execute(&mut self) -> Result<(), PoolError> {
        match &mut self.work {
            Work::Plain(_) => Ok(()),
            Work::Hooked(Some(handler)) => {
                let error = match &self.outcome {
                    Some(Err(PoolError::TaskFailed(e))) => Some(e),
                    _ => None,
                };
                handler.after_execute(error);
                Ok(())
            }
            Work::Hooked(None) => Err(PoolError::MissingHandler { task_id: self.id }),
        }
    }

    fn finish(mut self: Box<Self>) {
        let outcome = self.outcome.take().unwrap_or_else(|| {
            Err(PoolError::Internal(format!("task {} finished without running", self.id)))
        });
        self.slot.complete(outcome);
    }

    fn abandon(self: Box<Self>, error: PoolError) {
        self.slot.complete(Err(error));
    }
}

impl<T: Send + 'static> Drop for WorkJob<T> {
    fn drop(&mut self) {
        // No-op when finish/abandon already published a result.
        self.slot.complete(Err(PoolError::Internal(format!(
            "task {} dropped before completion",
            self.id
        ))));
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

/// A unit of work owned by the pool from submission until a terminal outcome.
pub struct Task {
    id: u64,
    job: Box<dyn Job>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("hooked", &self.is_hooked())
            .finish()
    }
}

impl Task {
    /// Wrap submitted work, returning the task and the caller's handle.
    pub fn new<T: Send + 'static>(id: u64, work: SubmittedWork<T>) -> (Self, TaskHandle<T>) {
        let work = match work {
            SubmittedWork::Plain(closure) => Work::Plain(Some(closure)),
            SubmittedWork::Hooked(handler) => Work::Hooked(Some(handler)),
        };
        Self::from_work(id, work)
    }

    /// Wrap a hooked handler.
    pub fn hooked<H: TaskHandler>(id: u64, handler: H) -> (Self, TaskHandle<H::Output>) {
        Self::new(id, SubmittedWork::Hooked(Box::new(handler)))
    }

    /// Wrap a plain closure.
    pub fn plain<T, F>(id: u64, closure: F) -> (Self, TaskHandle<T>)
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        Self::new(id, SubmittedWork::Plain(Box::new(closure)))
    }

    fn from_work<T: Send + 'static>(id: u64, work: Work<T>) -> (Self, TaskHandle<T>) {
        let slot = Arc::new(ResultSlot::new());
        let job = WorkJob {
            id,
            work,
            outcome: None,
            slot: Arc::clone(&slot),
        };
        (Self { id, job: Box::new(job) }, TaskHandle { id, slot })
    }

    /// A hooked task whose handler is absent; only reachable in tests.
    #[cfg(test)]
    pub(crate) fn hooked_without_handler<T: Send + 'static>(id: u64) -> (Self, TaskHandle<T>) {
        Self::from_work(id, Work::Hooked(None))
    }

    /// Task identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Whether the task carries lifecycle hooks.
    #[must_use]
    pub fn is_hooked(&self) -> bool {
        self.job.is_hooked()
    }

    /// Diagnostic of the underlying handler, if the task carries one.
    #[must_use]
    pub fn diagnostic(&self) -> Option<HandlerDiagnostic> {
        self.job.diagnostic()
    }

    /// Whether the body ran and returned `Ok`.
    pub(crate) fn succeeded(&self) -> bool {
        self.job.succeeded()
    }

    pub(crate) fn before_execute(&mut self, worker: &WorkerIdentity) -> Result<(), PoolError> {
        self.job.before_execute(worker)
    }

    pub(crate) fn run(&mut self) {
        self.job.run();
    }

    pub(crate) fn after_execute(&mut self) -> Result<(), PoolError> {
        self.job.after_execute()
    }

    pub(crate) fn finish(self) {
        self.job.finish();
    }

    pub(crate) fn abandon(self, error: PoolError) {
        self.job.abandon(error);
    }
}
