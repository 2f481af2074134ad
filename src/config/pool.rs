//! Pool configuration structures and loaders.
//!
//! Three sources are understood: Java-style `.properties` text (the keys
//! below, e.g. `corePoolSize=5`), JSON with the same camelCase keys, and
//! `ELASTIC_POOL_*` environment variables (a `.env` file is honoured).

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::PoolError;

/// Default core worker count.
pub const DEFAULT_CORE_POOL_SIZE: usize = 5;
/// Default maximum worker count.
pub const DEFAULT_MAXIMUM_POOL_SIZE: usize = 120;
/// Default queue capacity.
pub const DEFAULT_INITIAL_CAPACITY: usize = 20_000;
/// Default keep-alive for non-core workers, in seconds.
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 120;
/// Default worker thread name prefix.
pub const DEFAULT_THREAD_NAME: &str = "base-framework-threadPool-";
/// Default memory pressure threshold, as a fraction of the limit.
pub const DEFAULT_MEMORY_THRESHOLD: f64 = 0.9;
/// Default bounded wait of the rejection retry, in milliseconds.
pub const DEFAULT_REJECTION_RETRY_MILLIS: u64 = 3;
/// Default façade wait for a task result, in seconds.
pub const DEFAULT_RESULT_TIMEOUT_SECS: u64 = 10;

/// Prefix of the environment variables read by [`PoolConfig::from_env`].
pub const ENV_PREFIX: &str = "ELASTIC_POOL_";

const KEYS: [(&str, &str); 11] = [
    ("corePoolSize", "CORE_POOL_SIZE"),
    ("maximumPoolSize", "MAXIMUM_POOL_SIZE"),
    ("initialCapacity", "INITIAL_CAPACITY"),
    ("keepAliveTime", "KEEP_ALIVE_TIME"),
    ("threadName", "THREAD_NAME"),
    ("discard", "DISCARD"),
    ("memoryThreshold", "MEMORY_THRESHOLD"),
    ("heapLimitBytes", "HEAP_LIMIT_BYTES"),
    ("rejectionRetryMillis", "REJECTION_RETRY_MILLIS"),
    ("resultTimeoutSecs", "RESULT_TIMEOUT_SECS"),
    ("threadStackSize", "THREAD_STACK_SIZE"),
];

/// Configuration of one elastic pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
    /// Workers kept alive even when idle.
    pub core_pool_size: usize,
    /// Upper bound on live workers.
    pub maximum_pool_size: usize,
    /// Capacity of the bounded task queue.
    pub initial_capacity: usize,
    /// Idle time (seconds) after which a non-core worker exits.
    pub keep_alive_time: u64,
    /// Worker thread name prefix; a per-pool counter is appended.
    pub thread_name: String,
    /// Refuse admission while the process is under memory pressure.
    pub discard: bool,
    /// Fraction of the memory limit at which pressure is reported.
    pub memory_threshold: f64,
    /// Memory ceiling in bytes; `None` uses total system memory.
    pub heap_limit_bytes: Option<u64>,
    /// Bounded wait of the rejection retry, in milliseconds.
    pub rejection_retry_millis: u64,
    /// How long the façade waits for a task result, in seconds.
    pub result_timeout_secs: u64,
    /// Worker stack size in bytes; `None` keeps the platform default.
    pub thread_stack_size: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_pool_size: DEFAULT_CORE_POOL_SIZE,
            maximum_pool_size: DEFAULT_MAXIMUM_POOL_SIZE,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            keep_alive_time: DEFAULT_KEEP_ALIVE_SECS,
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
            discard: false,
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
            heap_limit_bytes: None,
            rejection_retry_millis: DEFAULT_REJECTION_RETRY_MILLIS,
            result_timeout_secs: DEFAULT_RESULT_TIMEOUT_SECS,
            thread_stack_size: None,
        }
    }
}

impl PoolConfig {
    /// Configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the core worker count.
    #[must_use]
    pub const fn with_core_pool_size(mut self, size: usize) -> Self {
        self.core_pool_size = size;
        self
    }

    /// Set the maximum worker count.
    #[must_use]
    pub const fn with_maximum_pool_size(mut self, size: usize) -> Self {
        self.maximum_pool_size = size;
        self
    }

    /// Set the queue capacity.
    #[must_use]
    pub const fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Set the keep-alive for non-core workers.
    #[must_use]
    pub const fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive_time = keep_alive.as_secs();
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Enable or disable discard-on-memory-pressure.
    #[must_use]
    pub const fn with_discard(mut self, discard: bool) -> Self {
        self.discard = discard;
        self
    }

    /// Set the memory pressure threshold fraction.
    #[must_use]
    pub const fn with_memory_threshold(mut self, threshold: f64) -> Self {
        self.memory_threshold = threshold;
        self
    }

    /// Set an explicit memory ceiling.
    #[must_use]
    pub const fn with_heap_limit_bytes(mut self, limit: u64) -> Self {
        self.heap_limit_bytes = Some(limit);
        self
    }

    /// Set the rejection retry window.
    #[must_use]
    pub fn with_rejection_retry(mut self, wait: Duration) -> Self {
        self.rejection_retry_millis = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the façade result timeout.
    #[must_use]
    pub const fn with_result_timeout(mut self, timeout: Duration) -> Self {
        self.result_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the worker stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// Keep-alive as a `Duration`.
    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_time)
    }

    /// Rejection retry window as a `Duration`.
    #[must_use]
    pub const fn rejection_retry(&self) -> Duration {
        Duration::from_millis(self.rejection_retry_millis)
    }

    /// Façade result timeout as a `Duration`.
    #[must_use]
    pub const fn result_timeout(&self) -> Duration {
        Duration::from_secs(self.result_timeout_secs)
    }

    /// Validate pool configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.maximum_pool_size == 0 {
            return Err("maximumPoolSize must be greater than 0".into());
        }
        if self.core_pool_size > self.maximum_pool_size {
            return Err(format!(
                "corePoolSize ({}) must not exceed maximumPoolSize ({})",
                self.core_pool_size, self.maximum_pool_size
            ));
        }
        if self.initial_capacity == 0 {
            return Err("initialCapacity must be greater than 0".into());
        }
        if !(self.memory_threshold > 0.0 && self.memory_threshold <= 1.0) {
            return Err(format!(
                "memoryThreshold must be in (0, 1], got {}",
                self.memory_threshold
            ));
        }
        if self.thread_name.is_empty() {
            return Err("threadName must not be empty".into());
        }
        if self.thread_name.contains('\0') {
            return Err("threadName must not contain null bytes".into());
        }
        Ok(())
    }

    /// Parse `.properties` text and validate.
    ///
    /// Lines are `key=value` or `key: value`; `#` and `!` start comments.
    /// Missing keys keep their defaults; unknown keys are logged and ignored.
    ///
    /// # Errors
    ///
    /// `PoolError::InvalidConfig` on malformed values or failed validation.
    pub fn from_properties_str(input: &str) -> Result<Self, PoolError> {
        let mut cfg = Self::default();
        for (line_no, raw) in input.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some((key, value)) = line.split_once(['=', ':']) else {
                return Err(PoolError::InvalidConfig(format!(
                    "line {}: expected `key=value`, got `{line}`",
                    line_no + 1
                )));
            };
            cfg.apply(key.trim(), value.trim())?;
        }
        cfg.validate().map_err(PoolError::InvalidConfig)?;
        Ok(cfg)
    }

    /// Parse JSON (camelCase keys) and validate.
    ///
    /// # Errors
    ///
    /// `PoolError::InvalidConfig` on parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, PoolError> {
        let cfg: Self = serde_json::from_str(input)
            .map_err(|e| PoolError::InvalidConfig(format!("parse error: {e}")))?;
        cfg.validate().map_err(PoolError::InvalidConfig)?;
        Ok(cfg)
    }

    /// Read `ELASTIC_POOL_*` variables, loading `.env` first when present.
    ///
    /// # Errors
    ///
    /// - `PoolError::ConfigMissing` if no `ELASTIC_POOL_*` variable is set
    /// - `PoolError::InvalidConfig` on malformed values or failed validation
    pub fn from_env() -> Result<Self, PoolError> {
        let _ = dotenvy::dotenv();
        let vars: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        Self::from_env_map(&vars)
    }

    fn from_env_map(vars: &HashMap<String, String>) -> Result<Self, PoolError> {
        let mut cfg = Self::default();
        let mut found = false;
        for (key, suffix) in KEYS {
            if let Some(value) = vars.get(&format!("{ENV_PREFIX}{suffix}")) {
                cfg.apply(key, value.trim())?;
                found = true;
            }
        }
        if !found {
            return Err(PoolError::ConfigMissing(format!(
                "no {ENV_PREFIX}* environment variables set"
            )));
        }
        cfg.validate().map_err(PoolError::InvalidConfig)?;
        Ok(cfg)
    }

    /// Load from a file: `.json` is parsed as JSON, anything else as properties.
    ///
    /// # Errors
    ///
    /// - `PoolError::ConfigMissing` if the file cannot be read
    /// - `PoolError::InvalidConfig` on parse or validation failure
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PoolError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PoolError::ConfigMissing(format!("{}: {e}", path.display())))?;
        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&text)
        } else {
            Self::from_properties_str(&text)
        }
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), PoolError> {
        match key {
            "corePoolSize" => self.core_pool_size = parse(key, value)?,
            "maximumPoolSize" => self.maximum_pool_size = parse(key, value)?,
            "initialCapacity" => self.initial_capacity = parse(key, value)?,
            "keepAliveTime" => self.keep_alive_time = parse(key, value)?,
            "threadName" => value.clone_into(&mut self.thread_name),
            "discard" => self.discard = parse(key, value)?,
            "memoryThreshold" => self.memory_threshold = parse(key, value)?,
            "heapLimitBytes" => self.heap_limit_bytes = Some(parse(key, value)?),
            "rejectionRetryMillis" => self.rejection_retry_millis = parse(key, value)?,
            "resultTimeoutSecs" => self.result_timeout_secs = parse(key, value)?,
            "threadStackSize" => self.thread_stack_size = Some(parse(key, value)?),
            other => warn!(key = other, "ignoring unknown pool configuration key"),
        }
        Ok(())
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, PoolError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| PoolError::InvalidConfig(format!("{key}: `{value}`: {e}")))
}

/// Root configuration for several named pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Map of pool name to configuration.
    pub pools: HashMap<String, PoolConfig>,
}

impl SchedulerConfig {
    /// Validate all pools and ensure at least one pool exists.
    ///
    /// # Errors
    ///
    /// Returns a description naming the first invalid pool.
    pub fn validate(&self) -> Result<(), String> {
        if self.pools.is_empty() {
            return Err("at least one pool must be defined".into());
        }
        for (name, pool) in &self.pools {
            pool.validate()
                .map_err(|e| format!("pool `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// `PoolError::InvalidConfig` on parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, PoolError> {
        let cfg: Self = serde_json::from_str(input)
            .map_err(|e| PoolError::InvalidConfig(format!("parse error: {e}")))?;
        cfg.validate().map_err(PoolError::InvalidConfig)?;
        Ok(cfg)
    }
}
