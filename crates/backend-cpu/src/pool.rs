//! Host thread pool used by the thread-parallel variants.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

/// Shared handle to a dedicated rayon pool.
///
/// Thread-parallel variants run inside `install` so `--threads` controls
/// their width without touching the global pool.
#[derive(Clone)]
pub struct HostPool {
    pool: Arc<rayon::ThreadPool>,
}

impl HostPool {
    /// `threads == 0` sizes the pool from the available parallelism.
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("perfsweep-host-{i}"))
            .build()
            .context("failed to build host thread pool")?;
        debug!(threads = pool.current_num_threads(), "host pool ready");
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn install<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(f)
    }
}

impl std::fmt::Debug for HostPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostPool")
            .field("threads", &self.threads())
            .finish()
    }
}
