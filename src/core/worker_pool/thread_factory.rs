//! Worker thread factory.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crate::core::handler::WorkerIdentity;

/// Spawns named worker threads: `prefix` followed by a per-pool counter.
///
/// Threads are never joined by the pool on drop, so they do not hold the
/// process open on their own account; they run at the default priority.
#[derive(Debug)]
pub struct ThreadFactory {
    prefix: String,
    stack_size: Option<usize>,
    next_index: AtomicU64,
}

impl ThreadFactory {
    /// Factory naming threads `prefix0`, `prefix1`, ...
    pub fn new(prefix: impl Into<String>, stack_size: Option<usize>) -> Self {
        Self {
            prefix: prefix.into(),
            stack_size,
            next_index: AtomicU64::new(0),
        }
    }

    /// Name prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Reserve the next worker identity.
    pub fn next_identity(&self) -> WorkerIdentity {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        WorkerIdentity {
            name: format!("{}{index}", self.prefix),
            index,
        }
    }

    /// Spawn `body` on a new thread named after `identity`.
    ///
    /// # Errors
    ///
    /// Propagates the OS error if the thread cannot be created.
    pub fn spawn<F>(&self, identity: &WorkerIdentity, body: F) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut builder = thread::Builder::new().name(identity.name.clone());
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        builder.spawn(body)
    }
}
