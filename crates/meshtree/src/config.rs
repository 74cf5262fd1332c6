//! Streaming configuration.

use std::time::Duration;

/// Default number of background I/O and decode workers.
const DEFAULT_WORKER_THREADS: usize = 4;
/// Default sleep between iterations of a blocking load.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Default bound on iterations of a blocking load (about 100 s at the default interval).
const DEFAULT_MAX_POLL_ITERATIONS: u32 = 10_000;
/// Default age after which an unvisited node is swept.
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30);
/// Default wait before a node whose load failed is requested again.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);
/// Default number of passes an unroutable completion is retained.
const DEFAULT_RETAIN_PASSES: u32 = 600;
/// Default time allowed for workers to finish on shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables for the cache manager and blocking traversal helpers.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Number of blocking workers reading and decoding tiles.
    pub worker_threads: usize,
    /// Sleep between iterations of `load_until_fully_displayable`.
    pub poll_interval: Duration,
    /// Iterations after which `load_until_fully_displayable` gives up.
    pub max_poll_iterations: u32,
    /// Age used by consumers to derive the staleness cutoff.
    pub stale_after: Duration,
    /// Wait before a node whose load failed for a transient reason is requested again.
    pub retry_after: Duration,
    /// Keep compressed textures after upload so cleared graphics can be rebuilt.
    pub keep_compressed_textures: bool,
    /// Compute smooth normals for meshes delivered without them.
    pub compute_missing_normals: bool,
    /// Passes a completion whose node is not under the processed root is kept.
    pub retain_passes: u32,
    /// Time allowed for in-flight work to finish on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_iterations: DEFAULT_MAX_POLL_ITERATIONS,
            stale_after: DEFAULT_STALE_AFTER,
            retry_after: DEFAULT_RETRY_AFTER,
            keep_compressed_textures: true,
            compute_missing_normals: true,
            retain_passes: DEFAULT_RETAIN_PASSES,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl StreamConfig {
    /// Set the number of background workers (at least one).
    #[must_use]
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads.max(1);
        self
    }

    /// Set the blocking-load poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the blocking-load iteration bound.
    #[must_use]
    pub fn with_max_poll_iterations(mut self, max_poll_iterations: u32) -> Self {
        self.max_poll_iterations = max_poll_iterations;
        self
    }

    /// Set the staleness age.
    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Set the failed-load retry delay.
    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Choose whether compressed textures survive upload.
    #[must_use]
    pub fn with_keep_compressed_textures(mut self, keep: bool) -> Self {
        self.keep_compressed_textures = keep;
        self
    }

    /// Choose whether missing normals are computed.
    #[must_use]
    pub fn with_compute_missing_normals(mut self, compute: bool) -> Self {
        self.compute_missing_normals = compute;
        self
    }

    /// Set how many passes an unroutable completion is kept.
    #[must_use]
    pub fn with_retain_passes(mut self, passes: u32) -> Self {
        self.retain_passes = passes;
        self
    }

    /// Set the shutdown timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}
