//! Builders to construct elastic pools from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{PoolConfig, SchedulerConfig};
use crate::core::memory::DEFAULT_SAMPLE_INTERVAL;
use crate::core::{
    ElasticPool, MemoryGauge, MemoryPressure, PoolError, ProcessMemoryGauge, RejectionHandler,
    RejectionSink,
};

/// Assembles an [`ElasticPool`] from a [`PoolConfig`] plus optional
/// collaborators.
///
/// Without an explicit gauge, a [`ProcessMemoryGauge`] is created when
/// `discard` is enabled, limited by `heap_limit_bytes` (or total system
/// memory). The memory gauge is ignored when `discard` is disabled.
pub struct ElasticPoolBuilder {
    config: PoolConfig,
    gauge: Option<Arc<dyn MemoryGauge>>,
    sinks: Vec<Arc<dyn RejectionSink>>,
}

impl std::fmt::Debug for ElasticPoolBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticPoolBuilder")
            .field("config", &self.config)
            .field("custom_gauge", &self.gauge.is_some())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl ElasticPoolBuilder {
    /// Start from `config`.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            gauge: None,
            sinks: Vec::new(),
        }
    }

    /// Use `gauge` for memory pressure instead of the process gauge.
    #[must_use]
    pub fn memory_gauge(mut self, gauge: Arc<dyn MemoryGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    /// Record terminal rejections into `sink` in addition to the log.
    #[must_use]
    pub fn rejection_sink(mut self, sink: Arc<dyn RejectionSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Build the pool.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidConfig` if the configuration is invalid
    /// - `PoolError::Internal` if the memory sampler cannot be started
    pub fn build(self) -> Result<ElasticPool, PoolError> {
        let Self {
            config,
            gauge,
            sinks,
        } = self;
        config.validate().map_err(PoolError::InvalidConfig)?;

        let pressure = if config.discard {
            let gauge: Arc<dyn MemoryGauge> = match gauge {
                Some(gauge) => gauge,
                None => Arc::new(ProcessMemoryGauge::new(
                    config.heap_limit_bytes,
                    DEFAULT_SAMPLE_INTERVAL,
                )?),
            };
            Some(MemoryPressure::new(gauge, config.memory_threshold))
        } else {
            None
        };

        let rejection = sinks.into_iter().fold(
            RejectionHandler::new(
                config.thread_name.clone(),
                config.rejection_retry(),
                pressure.clone(),
            ),
            RejectionHandler::with_sink,
        );

        ElasticPool::from_parts(&config, pressure, rejection)
    }
}

/// Build one pool per entry of a scheduler configuration.
///
/// # Errors
///
/// Returns `PoolError::InvalidConfig` naming the first invalid pool.
pub fn build_pools(cfg: &SchedulerConfig) -> Result<HashMap<String, ElasticPool>, PoolError> {
    cfg.validate()
        .map_err(|e| PoolError::InvalidConfig(format!("config invalid: {e}")))?;

    let mut pools = HashMap::new();
    for (name, pool_cfg) in &cfg.pools {
        let pool = ElasticPoolBuilder::new(pool_cfg.clone()).build()?;
        pools.insert(name.clone(), pool);
    }

    Ok(pools)
}
