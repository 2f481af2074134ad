//! Memory pressure detection for admission control.
//!
//! The predicate compares current usage against a threshold fraction of the
//! configured limit. It is consulted on every admission decision, so gauges
//! must answer from atomics; [`ProcessMemoryGauge`] refreshes its sample on a
//! background thread and its `usage` never touches `sysinfo`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, trace};

use super::error::PoolError;

/// A point-in-time memory reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Bytes currently in use.
    pub used_bytes: u64,
    /// Ceiling in bytes; `None` means unbounded.
    pub limit_bytes: Option<u64>,
}

/// Source of memory readings.
pub trait MemoryGauge: Send + Sync {
    /// Current usage. Must be cheap and non-blocking.
    fn usage(&self) -> MemoryUsage;
}

/// Gauge fed by the caller, e.g. from a tracking allocator.
#[derive(Debug, Default)]
pub struct ManualMemoryGauge {
    used: AtomicU64,
    // 0 encodes "unbounded"
    limit: AtomicU64,
}

impl ManualMemoryGauge {
    /// Gauge starting at `used_bytes` with the given limit.
    #[must_use]
    pub fn new(used_bytes: u64, limit_bytes: Option<u64>) -> Self {
        Self {
            used: AtomicU64::new(used_bytes),
            limit: AtomicU64::new(limit_bytes.unwrap_or(0)),
        }
    }

    /// Update the used byte count.
    pub fn set_used(&self, used_bytes: u64) {
        self.used.store(used_bytes, Ordering::Relaxed);
    }

    /// Update the limit.
    pub fn set_limit(&self, limit_bytes: Option<u64>) {
        self.limit.store(limit_bytes.unwrap_or(0), Ordering::Relaxed);
    }
}

impl MemoryGauge for ManualMemoryGauge {
    fn usage(&self) -> MemoryUsage {
        let limit = self.limit.load(Ordering::Relaxed);
        MemoryUsage {
            used_bytes: self.used.load(Ordering::Relaxed),
            limit_bytes: (limit > 0).then_some(limit),
        }
    }
}

/// Gauge reading this process's resident set size via `sysinfo`.
///
/// A sampler thread refreshes the reading every interval. Dropping the gauge
/// stops the sampler.
pub struct ProcessMemoryGauge {
    used: Arc<AtomicU64>,
    limit: Option<u64>,
    interval: Duration,
    /// Dropped with the gauge; disconnection stops the sampler.
    _stop: Sender<()>,
}

impl fmt::Debug for ProcessMemoryGauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessMemoryGauge")
            .field("used", &self.used.load(Ordering::Relaxed))
            .field("limit", &self.limit)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Default time between two RSS samples.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

impl ProcessMemoryGauge {
    /// Take a first sample and start the sampler thread. With no explicit
    /// limit, total system memory is used.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Internal` if the sampler thread cannot be spawned.
    pub fn new(limit_bytes: Option<u64>, interval: Duration) -> Result<Self, PoolError> {
        let mut system = System::new();
        let limit = limit_bytes.or_else(|| {
            system.refresh_memory();
            let total = system.total_memory();
            (total > 0).then_some(total)
        });

        let pid = Pid::from_u32(std::process::id());
        let used = Arc::new(AtomicU64::new(0));
        sample(&mut system, pid, &used);

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let sampler_used = Arc::clone(&used);
        thread::Builder::new()
            .name("memory-sampler".into())
            .spawn(move || run_sampler(system, pid, &sampler_used, &stop_rx, interval))
            .map_err(|e| PoolError::Internal(format!("failed to spawn memory sampler: {e}")))?;

        debug!(limit_bytes = ?limit, ?interval, "process memory gauge ready");
        Ok(Self {
            used,
            limit,
            interval,
            _stop: stop_tx,
        })
    }
}

fn run_sampler(
    mut system: System,
    pid: Pid,
    used: &AtomicU64,
    stop: &Receiver<()>,
    interval: Duration,
) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => sample(&mut system, pid, used),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    trace!("memory sampler stopped");
}

fn sample(system: &mut System, pid: Pid, used: &AtomicU64) {
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::new().with_memory(),
    );
    if let Some(process) = system.process(pid) {
        used.store(process.memory(), Ordering::Relaxed);
    }
}

impl MemoryGauge for ProcessMemoryGauge {
    fn usage(&self) -> MemoryUsage {
        MemoryUsage {
            used_bytes: self.used.load(Ordering::Relaxed),
            limit_bytes: self.limit,
        }
    }
}

/// Threshold predicate over a [`MemoryGauge`].
#[derive(Clone)]
pub struct MemoryPressure {
    gauge: Arc<dyn MemoryGauge>,
    threshold: f64,
}

impl fmt::Debug for MemoryPressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPressure")
            .field("threshold", &self.threshold)
            .field("usage", &self.gauge.usage())
            .finish()
    }
}

impl MemoryPressure {
    /// Pressure is present when `used >= threshold * limit`.
    pub fn new(gauge: Arc<dyn MemoryGauge>, threshold: f64) -> Self {
        Self { gauge, threshold }
    }

    /// Configured threshold fraction.
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Whether usage meets or exceeds the threshold. Unbounded limits never do.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn is_under_pressure(&self) -> bool {
        let usage = self.gauge.usage();
        match usage.limit_bytes {
            Some(limit) if limit > 0 => usage.used_bytes as f64 >= self.threshold * limit as f64,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pressure_at_threshold() {
        let gauge = Arc::new(ManualMemoryGauge::new(899, Some(1000)));
        let pressure = MemoryPressure::new(gauge.clone(), 0.9);
        assert!(!pressure.is_under_pressure());

        gauge.set_used(900);
        assert!(pressure.is_under_pressure());
    }

    #[test]
    fn test_unbounded_limit_never_pressured() {
        let gauge = Arc::new(ManualMemoryGauge::new(u64::MAX, None));
        let pressure = MemoryPressure::new(gauge, 0.5);
        assert!(!pressure.is_under_pressure());
    }

    #[test]
    fn test_full_threshold_compares_against_limit() {
        let gauge = Arc::new(ManualMemoryGauge::new(1000, Some(1000)));
        let pressure = MemoryPressure::new(gauge.clone(), 1.0);
        assert!(pressure.is_under_pressure());

        gauge.set_limit(Some(4000));
        assert!(!pressure.is_under_pressure());
    }

    #[test]
    fn test_process_gauge_reports_usage() {
        let gauge = ProcessMemoryGauge::new(Some(u64::MAX), Duration::from_millis(1)).unwrap();
        let usage = gauge.usage();
        assert_eq!(usage.limit_bytes, Some(u64::MAX));
        assert!(usage.used_bytes > 0);
    }

    #[test]
    fn test_sampler_stops_when_gauge_dropped() {
        let gauge = ProcessMemoryGauge::new(None, Duration::from_millis(1)).unwrap();
        let used = Arc::clone(&gauge.used);
        assert_eq!(Arc::strong_count(&used), 3);

        drop(gauge);
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while Arc::strong_count(&used) > 1 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(Arc::strong_count(&used), 1, "sampler thread released its reading");
    }
}
