//! Native implementation of `ElasticPool` using detached OS threads.
//!
//! # Design Principles
//!
//! - **No polling**: idle workers block in a `select!` over the task queue and
//!   the shutdown channel
//! - **Lock-free counters**: worker count, in-flight count and run state are
//!   atomics; the worker count only changes through CAS
//! - **Clean shutdown**: dropping the shutdown sender wakes every idle worker

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace, warn};

use crate::builders::ElasticPoolBuilder;
use crate::config::PoolConfig;
use crate::core::admission_queue::{ElasticQueue, ForceOfferError, PoolView, QueueView, Take};
use crate::core::audit::PLAIN_TASK;
use crate::core::error::PoolError;
use crate::core::handler::{TaskHandler, WorkerIdentity};
use crate::core::memory::MemoryPressure;
use crate::core::rejection::RejectionHandler;
use crate::core::task::{panic_message, SubmittedWork, Task, TaskHandle};

use super::{InFlightCounter, PoolCounters, PoolStats, RunState, ThreadFactory};

/// State shared between the pool handle and its workers.
struct PoolShared {
    name: String,
    core_pool_size: usize,
    maximum_pool_size: usize,
    keep_alive: Duration,

    queue: ElasticQueue,
    rejection: RejectionHandler,
    factory: ThreadFactory,

    pool_size: AtomicUsize,
    largest_pool_size: AtomicUsize,
    in_flight: InFlightCounter,
    counters: PoolCounters,
    state: AtomicU8,
    next_task_id: AtomicU64,

    /// Dropped on shutdown; disconnection wakes idle workers.
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,

    /// Notified whenever a worker exits.
    exit_lock: Mutex<()>,
    exited: Condvar,
}

impl PoolView for PoolShared {
    fn pool_size(&self) -> usize {
        self.pool_size.load(Ordering::Acquire)
    }

    fn maximum_pool_size(&self) -> usize {
        self.maximum_pool_size
    }

    fn in_flight(&self) -> usize {
        self.in_flight.get()
    }

    fn is_shutdown(&self) -> bool {
        self.state() != RunState::Running
    }
}

/// Decrements the worker count when a worker thread ends, however it ends.
struct WorkerExit {
    shared: Arc<PoolShared>,
    identity: WorkerIdentity,
    counted: bool,
}

impl Drop for WorkerExit {
    fn drop(&mut self) {
        let shared = &self.shared;
        if self.counted {
            shared.pool_size.fetch_sub(1, Ordering::AcqRel);
        }
        debug!(worker = %self.identity, pool_size = shared.pool_size(), "worker exited");

        // Queued work must not be stranded without a worker.
        if shared.state() != RunState::Stopped
            && shared.pool_size() == 0
            && !shared.queue.is_empty()
        {
            let _ = shared.add_worker(None, false);
        }

        let _guard = shared.exit_lock.lock();
        shared.exited.notify_all();
    }
}

impl PoolShared {
    fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move the run state forward to `target`. Returns the previous state.
    fn advance(&self, target: RunState) -> RunState {
        let previous = RunState::from_u8(self.state.fetch_max(target as u8, Ordering::AcqRel));
        if previous == RunState::Running {
            self.shutdown_tx.lock().take();
        }
        previous
    }

    /// Reserve a worker slot and start a thread, optionally with a first task.
    ///
    /// On refusal the first task is handed back.
    fn add_worker(self: &Arc<Self>, first: Option<Task>, core: bool) -> Result<(), Option<Task>> {
        let limit = if core { self.core_pool_size } else { self.maximum_pool_size };
        let mut current = self.pool_size.load(Ordering::Acquire);
        loop {
            let state = self.state();
            let admissible = match state {
                RunState::Running => true,
                RunState::ShuttingDown => first.is_none() && !self.queue.is_empty(),
                RunState::Stopped => false,
            };
            if !admissible || current >= limit {
                return Err(first);
            }
            match self.pool_size.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.largest_pool_size.fetch_max(current + 1, Ordering::Relaxed);

        let identity = self.factory.next_identity();
        let slot = Arc::new(Mutex::new(first));
        let body = {
            let shared = Arc::clone(self);
            let slot = Arc::clone(&slot);
            let identity = identity.clone();
            move || {
                let first = slot.lock().take();
                drop(slot);
                let mut exit = WorkerExit {
                    shared: Arc::clone(&shared),
                    identity: identity.clone(),
                    counted: true,
                };
                shared.work(&identity, first, &mut exit);
            }
        };

        match self.factory.spawn(&identity, body) {
            // Workers are detached; the handle is dropped.
            Ok(_) => {
                debug!(worker = %identity, core, pool_size = self.pool_size(), "worker started");
                Ok(())
            }
            Err(e) => {
                self.pool_size.fetch_sub(1, Ordering::AcqRel);
                error!(worker = %identity, error = %e, "failed to spawn worker thread");
                Err(slot.lock().take())
            }
        }
    }

    /// Start a worker whose first task is `task`.
    fn spawn_with(self: &Arc<Self>, task: Task, core: bool) -> Result<(), Task> {
        match self.add_worker(Some(task), core) {
            Ok(()) | Err(None) => Ok(()),
            Err(Some(task)) => Err(task),
        }
    }

    /// Admission path for an accepted task.
    fn admit(self: &Arc<Self>, task: Task) -> Result<(), PoolError> {
        let task = if self.pool_size() < self.core_pool_size {
            match self.spawn_with(task, true) {
                Ok(()) => return Ok(()),
                Err(task) => task,
            }
        } else {
            task
        };

        let task = match self.queue.offer(task) {
            Ok(()) => {
                self.recheck_after_enqueue();
                return Ok(());
            }
            Err(task) => task,
        };

        let task = match self.spawn_with(task, false) {
            Ok(()) => return Ok(()),
            Err(task) => task,
        };

        self.rejection.reject(task, &self.queue, &**self, &self.in_flight)
    }

    /// Handle a shutdown or worker exit that raced with an enqueue.
    fn recheck_after_enqueue(self: &Arc<Self>) {
        if self.state() == RunState::Stopped {
            let abandoned = self.abandon_queued();
            if abandoned > 0 {
                warn!(pool = %self.name, abandoned, "tasks enqueued after shutdown_now were abandoned");
            }
        } else if self.pool_size() == 0 {
            let _ = self.add_worker(None, false);
        }
    }

    fn abandon_queued(&self) -> usize {
        let drained = self.queue.drain();
        let count = drained.len();
        for task in drained {
            self.in_flight.decrement();
            self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
            task.abandon(PoolError::PoolShutdown);
        }
        count
    }

    fn work(&self, identity: &WorkerIdentity, first: Option<Task>, exit: &mut WorkerExit) {
        let mut next = first;
        loop {
            let task = match next.take() {
                Some(task) => task,
                None => match self.next_task(exit) {
                    Some(task) => task,
                    None => break,
                },
            };
            self.run_task(task, identity);
        }
    }

    /// Block for the next task. `None` means this worker should exit.
    fn next_task(&self, exit: &mut WorkerExit) -> Option<Task> {
        loop {
            match self.state() {
                RunState::Stopped => return None,
                RunState::ShuttingDown => return self.queue.try_take(),
                RunState::Running => {}
            }
            let keep_alive = (self.pool_size() > self.core_pool_size).then_some(self.keep_alive);
            match self.queue.take(&self.shutdown_rx, keep_alive) {
                Take::Task(task) => return Some(task),
                Take::Shutdown => {}
                Take::TimedOut => {
                    if self.retire(exit) {
                        trace!(worker = %exit.identity, "idle worker retired after keep-alive");
                        return None;
                    }
                }
            }
        }
    }

    /// Claim one non-core slot for retirement.
    fn retire(&self, exit: &mut WorkerExit) -> bool {
        let mut current = self.pool_size.load(Ordering::Acquire);
        while current > self.core_pool_size {
            match self.pool_size.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    exit.counted = false;
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
        false
    }

    /// Run one task: before-hook, body, after-hook, in-flight decrement,
    /// then publish. Nothing escapes to the worker loop.
    fn run_task(&self, mut task: Task, worker: &WorkerIdentity) {
        let task_id = task.id();
        self.counters.active.fetch_add(1, Ordering::Relaxed);
        trace!(worker = %worker, task_id, "task started");

        let lifecycle = panic::catch_unwind(AssertUnwindSafe(|| -> Result<(), PoolError> {
            task.before_execute(worker)?;
            task.run();
            task.after_execute()
        }));

        self.in_flight.decrement();
        self.counters.active.fetch_sub(1, Ordering::Relaxed);

        match lifecycle {
            Ok(Ok(())) => {
                let counter = if task.succeeded() {
                    &self.counters.completed
                } else {
                    &self.counters.failed
                };
                counter.fetch_add(1, Ordering::Relaxed);
                trace!(worker = %worker, task_id, "task finished");
                task.finish();
            }
            Ok(Err(e)) => {
                error!(worker = %worker, task_id, error = %e, "task aborted");
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                task.abandon(e);
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(worker = %worker, task_id, panic = %message, "lifecycle hook panicked");
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                task.abandon(PoolError::Internal(format!("lifecycle hook panicked: {message}")));
            }
        }
    }
}

/// Thread pool that grows past its core size instead of queueing while all
/// workers are busy, and queues only once it is fully scaled.
///
/// Dropping the pool starts a graceful shutdown without joining workers.
pub struct ElasticPool {
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for ElasticPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticPool")
            .field("name", &self.shared.name)
            .field("state", &self.shared.state())
            .field("stats", &self.stats())
            .finish()
    }
}

impl ElasticPool {
    /// Create a pool from configuration, using the process memory gauge
    /// when discard-on-pressure is enabled.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        ElasticPoolBuilder::new(config).build()
    }

    pub(crate) fn from_parts(
        config: &PoolConfig,
        pressure: Option<MemoryPressure>,
        rejection: RejectionHandler,
    ) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let shared = Arc::new(PoolShared {
            name: config.thread_name.clone(),
            core_pool_size: config.core_pool_size,
            maximum_pool_size: config.maximum_pool_size,
            keep_alive: config.keep_alive(),
            queue: ElasticQueue::new(config.initial_capacity, pressure),
            rejection,
            factory: ThreadFactory::new(config.thread_name.clone(), config.thread_stack_size),
            pool_size: AtomicUsize::new(0),
            largest_pool_size: AtomicUsize::new(0),
            in_flight: InFlightCounter::default(),
            counters: PoolCounters::default(),
            state: AtomicU8::new(RunState::Running as u8),
            next_task_id: AtomicU64::new(0),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            exit_lock: Mutex::new(()),
            exited: Condvar::new(),
        });
        let view = Arc::downgrade(&shared) as Weak<dyn PoolView>;
        shared.queue.bind(view)?;

        info!(
            pool = %config.thread_name,
            core_pool_size = config.core_pool_size,
            maximum_pool_size = config.maximum_pool_size,
            queue_capacity = config.initial_capacity,
            keep_alive_secs = config.keep_alive_time,
            discard = config.discard,
            "elastic pool initialized"
        );
        Ok(Self { shared })
    }

    /// Submit a handler whose lifecycle hooks run around its body.
    ///
    /// # Errors
    ///
    /// - `PoolError::PoolShutdown` if the pool is not running
    /// - `PoolError::CapacityExceeded` if the task was terminally rejected
    pub fn submit<H: TaskHandler>(&self, handler: H) -> Result<TaskHandle<H::Output>, PoolError> {
        self.submit_work(SubmittedWork::Hooked(Box::new(handler)))
    }

    /// Submit a closure without lifecycle hooks.
    ///
    /// # Errors
    ///
    /// Same as [`submit`](Self::submit).
    pub fn execute<T, F>(&self, closure: F) -> Result<TaskHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.submit_work(SubmittedWork::Plain(Box::new(closure)))
    }

    /// Submit already-resolved work.
    ///
    /// # Errors
    ///
    /// Same as [`submit`](Self::submit).
    pub fn submit_work<T: Send + 'static>(
        &self,
        work: SubmittedWork<T>,
    ) -> Result<TaskHandle<T>, PoolError> {
        let shared = &self.shared;
        let (task, handle) = self.accept(work)?;
        let id = task.id();

        match shared.admit(task) {
            Ok(()) => {
                trace!(pool = %shared.name, task_id = id, "task admitted");
                Ok(handle)
            }
            Err(e) => {
                shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Enqueue work bypassing the admission rules, waiting up to `wait` for
    /// a free slot. No worker is grown for it.
    ///
    /// # Errors
    ///
    /// - `PoolError::PoolShutdown` if the pool is not running
    /// - `PoolError::CapacityExceeded` if no slot freed up within `wait`
    pub fn force_offer<T: Send + 'static>(
        &self,
        work: SubmittedWork<T>,
        wait: Duration,
    ) -> Result<TaskHandle<T>, PoolError> {
        let shared = &self.shared;
        let (task, handle) = self.accept(work)?;

        match shared.queue.force_offer(task, wait) {
            Ok(()) => {
                shared.recheck_after_enqueue();
                Ok(handle)
            }
            Err(refused) => {
                shared.in_flight.decrement();
                shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                match refused {
                    ForceOfferError::Shutdown(_) => Err(PoolError::PoolShutdown),
                    ForceOfferError::Full(task) => Err(PoolError::CapacityExceeded {
                        handler: task
                            .diagnostic()
                            .map_or_else(|| PLAIN_TASK.to_owned(), |d| d.type_name.to_owned()),
                        pool_size: shared.pool_size(),
                        maximum_pool_size: shared.maximum_pool_size,
                        queued: shared.queue.len(),
                    }),
                }
            }
        }
    }

    /// Wrap accepted work and count it in flight.
    fn accept<T: Send + 'static>(
        &self,
        work: SubmittedWork<T>,
    ) -> Result<(Task, TaskHandle<T>), PoolError> {
        let shared = &self.shared;
        if shared.is_shutdown() {
            return Err(PoolError::PoolShutdown);
        }
        let id = shared.next_task_id.fetch_add(1, Ordering::Relaxed);
        let accepted = Task::new(id, work);
        shared.in_flight.increment();
        shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(accepted)
    }

    /// Start every core worker now instead of on first submissions.
    /// Returns the number of workers started.
    pub fn prestart_core_workers(&self) -> usize {
        let mut started = 0;
        while self.shared.add_worker(None, true).is_ok() {
            started += 1;
        }
        started
    }

    /// Stop accepting submissions; queued tasks still run.
    ///
    /// Does not wait; see [`await_termination`](Self::await_termination).
    pub fn shutdown(&self) {
        if self.shared.advance(RunState::ShuttingDown) == RunState::Running {
            info!(
                pool = %self.shared.name,
                queued = self.shared.queue.len(),
                "shutting down elastic pool"
            );
        }
    }

    /// Stop accepting submissions and abandon queued tasks. Their handles
    /// fail with `PoolError::PoolShutdown`. Running tasks are not
    /// interrupted. Returns the number of abandoned tasks.
    pub fn shutdown_now(&self) -> usize {
        self.shared.advance(RunState::Stopped);
        let abandoned = self.shared.abandon_queued();
        info!(pool = %self.shared.name, abandoned, "elastic pool stopped");
        abandoned
    }

    /// Block until the pool is shut down and every worker has exited, or
    /// `timeout` elapses. Returns whether the pool terminated. A timeout too
    /// large to express as a deadline waits without one.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let shared = &self.shared;
        let mut guard = shared.exit_lock.lock();
        while !self.is_terminated() {
            match deadline {
                Some(deadline) => {
                    if shared.exited.wait_until(&mut guard, deadline).timed_out() {
                        return self.is_terminated();
                    }
                }
                None => shared.exited.wait(&mut guard),
            }
        }
        true
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Whether shutdown has begun and every worker has exited.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.shared.is_shutdown() && self.shared.pool_size() == 0
    }

    /// Thread name prefix, which doubles as the pool's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Live worker count.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.shared.pool_size()
    }

    /// Tasks accepted but not yet terminally finished.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.get()
    }

    /// Read-only view of the admission queue.
    #[must_use]
    pub fn queue(&self) -> QueueView<'_> {
        QueueView::new(&self.shared.queue)
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        PoolStats {
            pool_size: shared.pool_size(),
            largest_pool_size: shared.largest_pool_size.load(Ordering::Relaxed),
            core_pool_size: shared.core_pool_size,
            maximum_pool_size: shared.maximum_pool_size,
            in_flight: shared.in_flight.get(),
            queued: shared.queue.len(),
            ..shared.counters.snapshot()
        }
    }
}

impl Drop for ElasticPool {
    fn drop(&mut self) {
        // Signal shutdown but don't join workers; they drain and exit.
        if self.shared.advance(RunState::ShuttingDown) == RunState::Running {
            debug!(pool = %self.shared.name, "ElasticPool dropped without explicit shutdown");
        }
    }
}
