//! Background load pipeline.
//!
//! The [`CacheManager`] turns load requests into tile reads on a pool of
//! blocking workers and hands the results back to the consumer thread.
//! Workers only read, parse and decode; every mutation of the tree happens
//! in [`CacheManager::process_requests`] on the thread that owns the tree.
//!
//! Requests are keyed by [`NodeKey`]. A node that is cleared or replaced gets
//! a new key, and its outstanding request is cancelled through
//! [`CacheManager::remove_request`], so a late completion can never reach a
//! node it was not issued for.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use meshtree_decode::BoundingSphere;
use tokio::runtime::{Builder, Runtime};

use crate::chunk::LoadedTile;
use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::reader::{ImageDecoder, StandardImageDecoder, TileReader};
use crate::render::RenderSystem;
use crate::resource::{NodeKey, ResourceId};
use crate::view::projected_diameter;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lifecycle of one request in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    /// Waiting for a worker.
    Queued,
    /// A worker is reading the tile.
    InFlight,
    /// The result is waiting for integration.
    Completed,
    /// The node went away; the result will be dropped.
    Cancelled,
}

/// A node to load in the background.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    /// Key of the node instance to fill.
    pub key: NodeKey,
    /// Resource backing the node.
    pub resource: ResourceId,
    /// Bounding sphere of the node, for prioritisation.
    pub sphere: BoundingSphere,
    /// LOD metric of the node, for prioritisation.
    pub lod_metric: f64,
}

/// View information attached to a batch of requests.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ViewHint {
    /// Pixel size, in dataset units, where the batch was requested.
    /// Zero when unknown.
    pub pixel_size: f64,
}

impl ViewHint {
    /// Hint for a batch requested at the given pixel size.
    #[must_use]
    pub fn new(pixel_size: f64) -> Self {
        Self { pixel_size }
    }

    /// How far the request's node is from being fine enough. Larger is coarser.
    #[must_use]
    pub fn screen_error(&self, request: &LoadRequest) -> f64 {
        let diameter = projected_diameter(&request.sphere, self.pixel_size);
        if request.lod_metric > 0.0 {
            diameter / request.lod_metric
        } else {
            diameter
        }
    }
}

/// Outcome of one [`CacheManager::process_requests`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStats {
    /// Completions installed into their node.
    pub integrated: usize,
    /// Failed loads applied to their node.
    pub failed: usize,
    /// Completions dropped because they were cancelled or stale.
    pub discarded: usize,
    /// Completions whose node was not found and that wait for a later pass.
    pub retained: usize,
}

/// Lifetime counters of a cache manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests accepted by `queue_child_load`.
    pub requested: u64,
    /// Background reads that succeeded.
    pub completed: u64,
    /// Background reads that failed.
    pub failed: u64,
    /// Requests cancelled before integration.
    pub cancelled: u64,
    /// Results dropped without being integrated.
    pub discarded: u64,
}

#[derive(Debug, Default)]
struct Counters {
    requested: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    discarded: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            requested: self.requested.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// A finished background read.
struct Completion {
    key: NodeKey,
    resource: ResourceId,
    result: Result<LoadedTile>,
}

/// A completion whose node has not been found yet.
struct Retained {
    completion: Completion,
    passes: u32,
}

/// State shared with the workers.
struct Shared {
    reader: Arc<dyn TileReader>,
    decoder: Arc<dyn ImageDecoder>,
    compute_missing_normals: bool,
    requests: Mutex<HashMap<NodeKey, RequestState>>,
    counters: Counters,
}

impl Shared {
    /// Read, validate and decode one tile.
    fn fetch(&self, resource: &ResourceId) -> Result<LoadedTile> {
        let content = self.reader.read(resource)?;
        let tile = LoadedTile::decode(content, &*self.decoder, self.compute_missing_normals)?;
        Ok(tile)
    }

    /// [`Shared::fetch`], turning a panic in the reader or decoder into an error.
    fn fetch_guarded(&self, resource: &ResourceId) -> Result<LoadedTile> {
        catch_unwind(AssertUnwindSafe(|| self.fetch(resource))).unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            tracing::error!(resource = %resource, "Worker panicked: {}", message);
            Err(Error::WorkerPanic {
                resource: resource.clone(),
                message,
            })
        })
    }

    /// Insert a queued entry unless the key is already known.
    fn try_queue(&self, key: NodeKey) -> bool {
        let mut requests = lock(&self.requests);
        if requests.contains_key(&key) {
            return false;
        }
        requests.insert(key, RequestState::Queued);
        true
    }

    /// Move a queued request in flight. False if it was removed meanwhile.
    fn begin(&self, key: NodeKey) -> bool {
        let mut requests = lock(&self.requests);
        match requests.get_mut(&key) {
            Some(state @ RequestState::Queued) => {
                *state = RequestState::InFlight;
                true
            }
            _ => false,
        }
    }

    /// Mark a request completed. False, and the entry is dropped, if it was
    /// cancelled while in flight.
    fn finish(&self, key: NodeKey) -> bool {
        let mut requests = lock(&self.requests);
        match requests.get_mut(&key) {
            Some(state @ RequestState::InFlight) => {
                *state = RequestState::Completed;
                true
            }
            _ => {
                requests.remove(&key);
                false
            }
        }
    }

    /// Drop the entry if it was cancelled or is unknown.
    fn take_if_cancelled(&self, key: NodeKey) -> bool {
        let mut requests = lock(&self.requests);
        match requests.get(&key) {
            Some(RequestState::Cancelled) | None => {
                requests.remove(&key);
                true
            }
            Some(_) => false,
        }
    }

    fn remove(&self, key: NodeKey) {
        lock(&self.requests).remove(&key);
    }

    /// Worker body for one request.
    fn run(&self, key: NodeKey, resource: ResourceId, tx: &async_channel::Sender<Completion>) {
        if !self.begin(key) {
            tracing::debug!(key = %key, resource = %resource, "Skipping removed request");
            return;
        }

        let result = self.fetch_guarded(&resource);

        if !self.finish(key) {
            Counters::bump(&self.counters.discarded);
            tracing::debug!(key = %key, resource = %resource, "Dropping cancelled load");
            return;
        }
        let counter = match &result {
            Ok(_) => &self.counters.completed,
            Err(_) => &self.counters.failed,
        };
        if tx
            .send_blocking(Completion {
                key,
                resource,
                result,
            })
            .is_err()
        {
            tracing::debug!(key = %key, "Completion channel closed");
        }
        Counters::bump(counter);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

/// Application-scoped load service shared by every node of a tree.
///
/// Construct one per application and pass it by reference. Dropping it
/// shuts the workers down.
pub struct CacheManager {
    shared: Arc<Shared>,
    config: StreamConfig,
    runtime: Mutex<Option<Runtime>>,
    completions_tx: async_channel::Sender<Completion>,
    completions_rx: async_channel::Receiver<Completion>,
    retained: Mutex<Vec<Retained>>,
    shut_down: AtomicBool,
}

impl CacheManager {
    /// Create a cache manager with `config.worker_threads` blocking workers.
    pub fn new(
        reader: Arc<dyn TileReader>,
        decoder: Arc<dyn ImageDecoder>,
        config: StreamConfig,
    ) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.worker_threads.max(1))
            .thread_name("meshtree-io")
            .build()
            .map_err(|e| Error::Runtime {
                message: e.to_string(),
            })?;
        let (completions_tx, completions_rx) = async_channel::unbounded();

        tracing::info!(workers = config.worker_threads, "Cache manager started");

        Ok(Self {
            shared: Arc::new(Shared {
                reader,
                decoder,
                compute_missing_normals: config.compute_missing_normals,
                requests: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
            config,
            runtime: Mutex::new(Some(runtime)),
            completions_tx,
            completions_rx,
            retained: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Create a cache manager with the standard image decoder and default
    /// configuration.
    pub fn with_defaults(reader: Arc<dyn TileReader>) -> Result<Self> {
        Self::new(reader, Arc::new(StandardImageDecoder), StreamConfig::default())
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// The image decoder, used to re-decode textures on the consumer thread.
    #[must_use]
    pub fn decoder(&self) -> &dyn ImageDecoder {
        &*self.shared.decoder
    }

    /// Whether [`CacheManager::shutdown`] has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Read a node's resource on the calling thread and install it.
    ///
    /// Any outstanding background request for the node is cancelled first.
    pub fn synchronous_read<R: RenderSystem>(
        &self,
        node: &mut Node<R>,
        resource: &ResourceId,
    ) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }
        if node.is_loaded() {
            return Err(Error::AlreadyLoaded);
        }
        self.remove_request(node.key());

        let tile = self.shared.fetch(resource)?;
        node.install(tile, self.config.keep_compressed_textures);
        Ok(())
    }

    /// Queue a batch of sibling loads without blocking.
    ///
    /// Nodes that already have a request are skipped. The batch is dispatched
    /// coarsest first according to `hint`. Returns how many were queued.
    pub fn queue_child_load(&self, mut requests: Vec<LoadRequest>, hint: ViewHint) -> usize {
        if self.is_shut_down() {
            return 0;
        }
        requests.sort_by(|a, b| hint.screen_error(b).total_cmp(&hint.screen_error(a)));

        let runtime = lock(&self.runtime);
        let Some(runtime) = runtime.as_ref() else {
            return 0;
        };

        let mut queued = 0;
        for LoadRequest { key, resource, .. } in requests {
            if !self.shared.try_queue(key) {
                continue;
            }
            tracing::debug!(key = %key, resource = %resource, "Queued load");

            let shared = Arc::clone(&self.shared);
            let tx = self.completions_tx.clone();
            runtime.spawn_blocking(move || shared.run(key, resource, &tx));
            Counters::bump(&self.shared.counters.requested);
            queued += 1;
        }
        queued
    }

    /// Integrate finished loads into the nodes under `root`.
    ///
    /// This is the only place background work reaches the tree. Cancelled
    /// completions are dropped. Completions whose node is not under `root`
    /// are kept for up to `retain_passes` later passes.
    pub fn process_requests<R: RenderSystem>(&self, root: &mut Node<R>) -> ProcessStats {
        let mut stats = ProcessStats::default();

        let mut ready: HashMap<NodeKey, Retained> = std::mem::take(&mut *lock(&self.retained))
            .into_iter()
            .map(|r| (r.completion.key, r))
            .collect();
        while let Ok(completion) = self.completions_rx.try_recv() {
            ready.insert(
                completion.key,
                Retained {
                    completion,
                    passes: 0,
                },
            );
        }

        ready.retain(|&key, retained| {
            if self.shared.take_if_cancelled(key) {
                tracing::debug!(
                    key = %key,
                    resource = %retained.completion.resource,
                    "Discarding cancelled completion"
                );
                self.discard(&mut stats);
                false
            } else {
                true
            }
        });
        if ready.is_empty() {
            return stats;
        }

        self.integrate_subtree(root, &mut ready, &mut stats);

        let mut retained = lock(&self.retained);
        for (key, mut item) in ready {
            item.passes += 1;
            if item.passes > self.config.retain_passes {
                tracing::debug!(
                    key = %key,
                    resource = %item.completion.resource,
                    "Dropping unroutable completion"
                );
                self.shared.remove(key);
                self.discard(&mut stats);
            } else {
                stats.retained += 1;
                retained.push(item);
            }
        }

        tracing::trace!(
            integrated = stats.integrated,
            failed = stats.failed,
            discarded = stats.discarded,
            retained = stats.retained,
            "Processed completions"
        );
        stats
    }

    fn integrate_subtree<R: RenderSystem>(
        &self,
        node: &mut Node<R>,
        ready: &mut HashMap<NodeKey, Retained>,
        stats: &mut ProcessStats,
    ) {
        if let Some(item) = ready.remove(&node.key()) {
            self.integrate(node, item.completion, stats);
        }
        for child in node.children_mut() {
            if ready.is_empty() {
                return;
            }
            self.integrate_subtree(child, ready, stats);
        }
    }

    fn integrate<R: RenderSystem>(
        &self,
        node: &mut Node<R>,
        completion: Completion,
        stats: &mut ProcessStats,
    ) {
        self.shared.remove(completion.key);
        if node.is_loaded() {
            tracing::debug!(key = %completion.key, "Node already loaded, discarding completion");
            self.discard(stats);
            return;
        }
        match completion.result {
            Ok(tile) => {
                node.install(tile, self.config.keep_compressed_textures);
                stats.integrated += 1;
            }
            Err(e) => {
                node.mark_failed(&e);
                stats.failed += 1;
            }
        }
    }

    fn discard(&self, stats: &mut ProcessStats) {
        stats.discarded += 1;
        Counters::bump(&self.shared.counters.discarded);
    }

    /// Cancel the request for a node that is going away.
    ///
    /// A queued request is removed and its worker will skip it. An in-flight
    /// or completed request is marked cancelled and its result is dropped.
    /// Returns whether a request existed.
    pub fn remove_request(&self, key: NodeKey) -> bool {
        let mut requests = lock(&self.shared.requests);
        let cancelled = match requests.get(&key).copied() {
            Some(RequestState::Queued) => {
                requests.remove(&key);
                true
            }
            Some(RequestState::InFlight | RequestState::Completed) => {
                requests.insert(key, RequestState::Cancelled);
                true
            }
            Some(RequestState::Cancelled) | None => false,
        };
        if cancelled {
            Counters::bump(&self.shared.counters.cancelled);
            tracing::debug!(key = %key, "Cancelled request");
        }
        cancelled
    }

    /// Number of requests queued, in flight or awaiting integration.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        lock(&self.shared.requests)
            .values()
            .filter(|&&s| s != RequestState::Cancelled)
            .count()
    }

    /// Whether a node has a request queued, in flight or awaiting integration.
    #[must_use]
    pub fn is_pending(&self, key: NodeKey) -> bool {
        lock(&self.shared.requests)
            .get(&key)
            .is_some_and(|&s| s != RequestState::Cancelled)
    }

    /// Lifetime counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.shared.counters.snapshot()
    }

    /// Stop accepting work, cancel everything outstanding and join the workers.
    ///
    /// Workers still running after `shutdown_timeout` are abandoned.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        {
            let mut requests = lock(&self.shared.requests);
            requests.retain(|_, s| *s != RequestState::Queued);
            for state in requests.values_mut() {
                *state = RequestState::Cancelled;
            }
        }
        self.completions_rx.close();
        lock(&self.retained).clear();

        if let Some(runtime) = lock(&self.runtime).take() {
            runtime.shutdown_timeout(self.config.shutdown_timeout);
        }
        tracing::info!("Cache manager shut down");
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
