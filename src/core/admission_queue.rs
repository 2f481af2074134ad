//! Elastic admission queue.
//!
//! A bounded FIFO whose `offer` decides between queueing a task and refusing
//! it so the owning pool grows a new worker instead. A plain bounded pool
//! only grows once its queue is completely full; this queue refuses as soon
//! as outstanding work exceeds the live workers, and keeps the queue as the
//! backstop once the pool is fully scaled.
//!
//! The queue reads live counts from its owner through [`PoolView`]. The
//! back-reference is bound once, after the owner exists; until then every
//! offer is accepted.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use tracing::trace;

use super::error::PoolError;
use super::memory::MemoryPressure;
use super::task::Task;

/// Live pool counts the admission decision depends on.
pub trait PoolView: Send + Sync {
    /// Live worker count.
    fn pool_size(&self) -> usize;
    /// Configured maximum worker count.
    fn maximum_pool_size(&self) -> usize;
    /// Tasks accepted but not yet terminally finished.
    fn in_flight(&self) -> usize;
    /// Whether the pool has begun shutting down.
    fn is_shutdown(&self) -> bool;
}

/// Outcome of the admission decision, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// No owning pool bound yet; enqueue.
    Bootstrap,
    /// Memory pressure with discard enabled; refuse.
    MemoryPressure,
    /// Pool is at its maximum; the queue is the only backstop. Enqueue.
    Saturated,
    /// Fewer tasks in flight than live workers; enqueue.
    IdleWorkers,
    /// Below maximum with every worker busy; refuse to force growth.
    Grow,
    /// No other rule applied; enqueue.
    Fallback,
}

impl Admission {
    /// Whether this decision enqueues the task.
    #[must_use]
    pub const fn enqueues(self) -> bool {
        !matches!(self, Self::MemoryPressure | Self::Grow)
    }
}

/// Why `force_offer` failed. The task is handed back.
#[derive(Debug)]
pub enum ForceOfferError {
    /// The owning pool is shutting down.
    Shutdown(Task),
    /// No room appeared within the wait.
    Full(Task),
}

impl ForceOfferError {
    /// Recover the task.
    #[must_use]
    pub fn into_task(self) -> Task {
        match self {
            Self::Shutdown(task) | Self::Full(task) => task,
        }
    }

    /// Whether the pool was shutting down.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown(_))
    }
}

/// Result of a worker's blocking take.
#[derive(Debug)]
pub enum Take {
    /// The next queued task.
    Task(Task),
    /// The shutdown channel disconnected.
    Shutdown,
    /// No task arrived within the keep-alive.
    TimedOut,
}

/// Bounded task queue with elastic admission.
pub struct ElasticQueue {
    tx: Sender<Task>,
    rx: Receiver<Task>,
    capacity: usize,
    parent: OnceLock<Weak<dyn PoolView>>,
    pressure: Option<MemoryPressure>,
}

impl fmt::Debug for ElasticQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElasticQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("bound", &self.parent.get().is_some())
            .field("discard_on_pressure", &self.pressure.is_some())
            .finish()
    }
}

impl ElasticQueue {
    /// Create an unbound queue. `pressure` is consulted only when `Some`,
    /// i.e. when discard-on-memory-pressure is enabled.
    #[must_use]
    pub fn new(capacity: usize, pressure: Option<MemoryPressure>) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            parent: OnceLock::new(),
            pressure,
        }
    }

    /// Bind the owning pool. Can only be done once.
    ///
    /// # Errors
    ///
    /// `PoolError::Internal` if the queue is already bound.
    pub fn bind(&self, parent: Weak<dyn PoolView>) -> Result<(), PoolError> {
        self.parent
            .set(parent)
            .map_err(|_| PoolError::Internal("admission queue already bound to a pool".into()))
    }

    fn parent(&self) -> Option<Arc<dyn PoolView>> {
        self.parent.get().and_then(Weak::upgrade)
    }

    /// Evaluate the admission rules against the owner's live counts.
    #[must_use]
    pub fn decide(&self) -> Admission {
        let Some(pool) = self.parent() else {
            return Admission::Bootstrap;
        };
        if let Some(pressure) = &self.pressure {
            if pressure.is_under_pressure() {
                return Admission::MemoryPressure;
            }
        }
        let pool_size = pool.pool_size();
        let maximum = pool.maximum_pool_size();
        if pool_size == maximum {
            return Admission::Saturated;
        }
        if pool.in_flight() < pool_size {
            return Admission::IdleWorkers;
        }
        if pool_size < maximum {
            return Admission::Grow;
        }
        Admission::Fallback
    }

    /// Offer a task. On refusal (or a full queue) the task is handed back so
    /// the caller can try growing the pool or rejecting it.
    ///
    /// # Errors
    ///
    /// Returns the task when it was not enqueued.
    pub fn offer(&self, task: Task) -> Result<(), Task> {
        let decision = self.decide();
        trace!(task_id = task.id(), ?decision, queued = self.len(), "admission decision");
        if !decision.enqueues() {
            return Err(task);
        }
        self.tx.try_send(task).map_err(crossbeam_channel::TrySendError::into_inner)
    }

    /// Enqueue bypassing the admission rules, waiting up to `wait` for room.
    ///
    /// # Errors
    ///
    /// - `ForceOfferError::Shutdown` if the owning pool is shutting down
    /// - `ForceOfferError::Full` if no room appeared in time
    pub fn force_offer(&self, task: Task, wait: Duration) -> Result<(), ForceOfferError> {
        if let Some(parent) = self.parent.get() {
            if parent.upgrade().is_none_or(|pool| pool.is_shutdown()) {
                return Err(ForceOfferError::Shutdown(task));
            }
        }
        self.tx.send_timeout(task, wait).map_err(|e| match e {
            SendTimeoutError::Timeout(task) => ForceOfferError::Full(task),
            SendTimeoutError::Disconnected(task) => ForceOfferError::Shutdown(task),
        })
    }

    /// Block for the next task until `shutdown` disconnects or `keep_alive`
    /// elapses. `None` waits indefinitely.
    pub fn take(&self, shutdown: &Receiver<()>, keep_alive: Option<Duration>) -> Take {
        match keep_alive {
            Some(timeout) => crossbeam_channel::select! {
                recv(self.rx) -> msg => msg.map_or(Take::Shutdown, Take::Task),
                recv(shutdown) -> _ => Take::Shutdown,
                default(timeout) => Take::TimedOut,
            },
            None => crossbeam_channel::select! {
                recv(self.rx) -> msg => msg.map_or(Take::Shutdown, Take::Task),
                recv(shutdown) -> _ => Take::Shutdown,
            },
        }
    }

    /// Dequeue without blocking.
    #[must_use]
    pub fn try_take(&self) -> Option<Task> {
        self.rx.try_recv().ok()
    }

    /// Remove every queued task.
    #[must_use]
    pub fn drain(&self) -> Vec<Task> {
        self.rx.try_iter().collect()
    }

    /// Queued task count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots.
    #[must_use]
    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }
}

/// Read-only view of a pool's admission queue.
///
/// Tasks only enter a pool's queue through its submission path, which
/// keeps the in-flight count balanced.
#[derive(Debug, Clone, Copy)]
pub struct QueueView<'a> {
    queue: &'a ElasticQueue,
}

impl<'a> QueueView<'a> {
    pub(crate) const fn new(queue: &'a ElasticQueue) -> Self {
        Self { queue }
    }

    /// Evaluate the admission rules against the owner's live counts.
    #[must_use]
    pub fn decide(&self) -> Admission {
        self.queue.decide()
    }

    /// Queued task count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Free slots.
    #[must_use]
    pub fn remaining_capacity(&self) -> usize {
        self.queue.remaining_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::ManualMemoryGauge;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakePool {
        pool_size: AtomicUsize,
        maximum: AtomicUsize,
        in_flight: AtomicUsize,
        shutdown: AtomicBool,
    }

    impl FakePool {
        fn with(pool_size: usize, maximum: usize, in_flight: usize) -> Arc<Self> {
            let pool = Self::default();
            pool.pool_size.store(pool_size, Ordering::SeqCst);
            pool.maximum.store(maximum, Ordering::SeqCst);
            pool.in_flight.store(in_flight, Ordering::SeqCst);
            Arc::new(pool)
        }
    }

    impl PoolView for FakePool {
        fn pool_size(&self) -> usize {
            self.pool_size.load(Ordering::SeqCst)
        }
        fn maximum_pool_size(&self) -> usize {
            self.maximum.load(Ordering::SeqCst)
        }
        fn in_flight(&self) -> usize {
            self.in_flight.load(Ordering::SeqCst)
        }
        fn is_shutdown(&self) -> bool {
            self.shutdown.load(Ordering::SeqCst)
        }
    }

    fn bound(pool: &Arc<FakePool>, pressure: Option<MemoryPressure>) -> ElasticQueue {
        let queue = ElasticQueue::new(4, pressure);
        let weak: Weak<dyn PoolView> = Arc::downgrade(pool) as Weak<dyn PoolView>;
        queue.bind(weak).unwrap();
        queue
    }

    fn task(id: u64) -> Task {
        Task::plain(id, || Ok(())).0
    }

    #[test]
    fn test_unbound_queue_accepts() {
        let queue = ElasticQueue::new(1, None);
        assert_eq!(queue.decide(), Admission::Bootstrap);
        assert!(queue.offer(task(1)).is_ok());
        assert!(queue.offer(task(2)).is_err(), "capacity still applies");
    }

    #[test]
    fn test_decision_table() {
        let cases = [
            // (pool_size, max, in_flight, expected)
            (4, 4, 10, Admission::Saturated),
            (3, 4, 2, Admission::IdleWorkers),
            (3, 4, 3, Admission::Grow),
            (3, 4, 9, Admission::Grow),
            (5, 4, 9, Admission::Fallback),
        ];
        for (pool_size, max, in_flight, expected) in cases {
            let pool = FakePool::with(pool_size, max, in_flight);
            let queue = bound(&pool, None);
            assert_eq!(queue.decide(), expected, "{pool_size}/{max} in_flight={in_flight}");
        }
    }

    #[test]
    fn test_grow_refuses_and_returns_task() {
        let pool = FakePool::with(2, 4, 2);
        let queue = bound(&pool, None);
        let refused = queue.offer(task(9)).unwrap_err();
        assert_eq!(refused.id(), 9);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_memory_pressure_refuses_before_saturation_rule() {
        let gauge = Arc::new(ManualMemoryGauge::new(95, Some(100)));
        let pool = FakePool::with(4, 4, 0);
        let queue = bound(&pool, Some(MemoryPressure::new(gauge.clone(), 0.9)));
        assert_eq!(queue.decide(), Admission::MemoryPressure);

        gauge.set_used(10);
        assert_eq!(queue.decide(), Admission::Saturated);
    }

    #[test]
    fn test_force_offer_bypasses_decision() {
        let pool = FakePool::with(2, 4, 2);
        let queue = bound(&pool, None);
        assert!(queue.force_offer(task(1), Duration::from_millis(1)).is_ok());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_force_offer_fails_after_shutdown() {
        let pool = FakePool::with(1, 1, 0);
        let queue = bound(&pool, None);
        pool.shutdown.store(true, Ordering::SeqCst);
        let err = queue.force_offer(task(1), Duration::from_millis(1)).unwrap_err();
        assert!(err.is_shutdown());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_force_offer_times_out_when_full() {
        let queue = ElasticQueue::new(1, None);
        queue.force_offer(task(1), Duration::from_millis(1)).unwrap();
        let err = queue.force_offer(task(2), Duration::from_millis(3)).unwrap_err();
        assert!(!err.is_shutdown());
        assert_eq!(err.into_task().id(), 2);
    }

    #[test]
    fn test_bind_twice_fails() {
        let pool = FakePool::with(1, 1, 0);
        let queue = bound(&pool, None);
        let weak: Weak<dyn PoolView> = Arc::downgrade(&pool) as Weak<dyn PoolView>;
        assert!(queue.bind(weak).is_err());
    }

    #[test]
    fn test_take_times_out_and_sees_shutdown() {
        let queue = ElasticQueue::new(2, None);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        assert!(matches!(
            queue.take(&shutdown_rx, Some(Duration::from_millis(5))),
            Take::TimedOut
        ));
        drop(shutdown_tx);
        assert!(matches!(queue.take(&shutdown_rx, None), Take::Shutdown));
    }

    #[test]
    fn test_view_reports_queue_state() {
        let pool = FakePool::with(2, 2, 2);
        let queue = bound(&pool, None);
        queue.offer(task(1)).unwrap();
        let view = QueueView::new(&queue);
        assert_eq!(view.decide(), Admission::Saturated);
        assert_eq!(view.len(), 1);
        assert!(!view.is_empty());
        assert_eq!(view.capacity(), 4);
        assert_eq!(view.remaining_capacity(), 3);
    }

    #[test]
    fn test_fifo_order() {
        let queue = ElasticQueue::new(3, None);
        for id in 0..3 {
            queue.offer(task(id)).unwrap();
        }
        let ids: Vec<u64> = queue.drain().iter().map(Task::id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
