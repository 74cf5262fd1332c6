//! The streaming level-of-detail tree.
//!
//! A [`Node`] owns its children and its geometry chunks. Children are created
//! unloaded when the parent's content is integrated and are filled in either
//! synchronously ([`Node::load`]) or in the background through the
//! [`CacheManager`]. Nothing in this module blocks except [`Node::load`] and
//! [`Node::load_until_fully_displayable`].

mod diagnostics;
mod draw;

pub use diagnostics::{TreeIssue, TreeStats};
pub use draw::{DrawContext, DrawMode, DrawStats};

use std::time::Duration;

use meshtree_decode::{BoundingSphere, NodeDescriptor};
use web_time::Instant;

use crate::cache::{CacheManager, LoadRequest, ViewHint};
use crate::chunk::{GeometryChunk, LoadedTile};
use crate::error::{Error, Result};
use crate::render::RenderSystem;
use crate::resource::{NodeKey, ResourceId};

/// Whether and how a node's content has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// No content resolved. The node has no children and no chunks.
    Unloaded,
    /// Content resolved but without geometry of its own.
    LoadedEmpty,
    /// Content resolved with at least one geometry chunk.
    LoadedDisplayable,
}

/// The last failed attempt to load a node.
#[derive(Debug, Clone, Copy)]
struct LoadFailure {
    at: Instant,
    permanent: bool,
}

impl LoadFailure {
    fn new(error: &Error) -> Self {
        Self {
            at: Instant::now(),
            permanent: error.is_permanent(),
        }
    }

    fn permanent() -> Self {
        Self {
            at: Instant::now(),
            permanent: true,
        }
    }

    fn allows_retry(&self, now: Instant, retry_after: Duration) -> bool {
        !self.permanent && now.saturating_duration_since(self.at) >= retry_after
    }
}

/// One entry in the spatial LOD tree.
pub struct Node<R: RenderSystem> {
    key: NodeKey,
    parent: Option<NodeKey>,
    descriptor: NodeDescriptor,
    resource: Option<ResourceId>,
    level: u32,
    state: LoadState,
    chunks: Vec<GeometryChunk<R>>,
    children: Vec<Node<R>>,
    pinned: bool,
    children_requested: bool,
    failure: Option<LoadFailure>,
    last_access: Instant,
}

impl<R: RenderSystem> Node<R> {
    /// Create an unloaded root node.
    ///
    /// The descriptor's resource is taken relative to the dataset root.
    #[must_use]
    pub fn root(descriptor: NodeDescriptor) -> Self {
        let resource = descriptor
            .single_resource()
            .map(|r| ResourceId::resolve("", r));
        Self::unloaded(descriptor, resource, None, 0)
    }

    fn child(descriptor: NodeDescriptor, parent: &Self, directory: &str) -> Self {
        let resource = descriptor
            .single_resource()
            .map(|r| ResourceId::resolve(directory, r));
        let mut node = Self::unloaded(descriptor, resource, Some(parent.key), parent.level + 1);
        if node.resource.is_none() {
            tracing::warn!(
                id = %node.descriptor.id,
                resources = node.descriptor.resources.len(),
                "Child descriptor does not reference exactly one resource"
            );
            node.failure = Some(LoadFailure::permanent());
        }
        node
    }

    fn unloaded(
        descriptor: NodeDescriptor,
        resource: Option<ResourceId>,
        parent: Option<NodeKey>,
        level: u32,
    ) -> Self {
        Self {
            key: NodeKey::next(),
            parent,
            descriptor,
            resource,
            level,
            state: LoadState::Unloaded,
            chunks: Vec::new(),
            children: Vec::new(),
            pinned: false,
            children_requested: false,
            failure: None,
            last_access: Instant::now(),
        }
    }

    /// Identity of this node instance.
    #[must_use]
    pub fn key(&self) -> NodeKey {
        self.key
    }

    /// Key of the parent node, `None` at the root.
    #[must_use]
    pub fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    /// The descriptor this node was created from.
    #[must_use]
    pub fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    /// Backing resource, `None` if the descriptor does not name exactly one.
    #[must_use]
    pub fn resource(&self) -> Option<&ResourceId> {
        self.resource.as_ref()
    }

    /// Bounding sphere of the node's content.
    #[must_use]
    pub fn sphere(&self) -> &BoundingSphere {
        &self.descriptor.sphere
    }

    /// Largest on-screen diameter in pixels at which the node's own geometry suffices.
    #[must_use]
    pub fn lod_metric(&self) -> f64 {
        self.descriptor.lod_metric
    }

    /// Distance from the root, which is level 0.
    #[must_use]
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Current load state.
    #[must_use]
    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Whether the node's content has been resolved.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.state != LoadState::Unloaded
    }

    /// Whether the node carries geometry of its own.
    #[must_use]
    pub fn is_displayable(&self) -> bool {
        self.state == LoadState::LoadedDisplayable
    }

    /// Whether the node is exempt from the staleness sweep.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Pin or unpin the node.
    pub fn set_pinned(&mut self, pinned: bool) {
        self.pinned = pinned;
    }

    /// Whether a batch load for the children has been issued.
    #[must_use]
    pub fn children_requested(&self) -> bool {
        self.children_requested
    }

    /// Whether the last attempt to load this node failed.
    #[must_use]
    pub fn load_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Whether a load may be attempted at `now`.
    ///
    /// True unless the last attempt failed permanently, or failed less than
    /// `retry_after` ago.
    #[must_use]
    pub fn may_load(&self, now: Instant, retry_after: Duration) -> bool {
        self.failure
            .is_none_or(|failure| failure.allows_retry(now, retry_after))
    }

    /// Last time the node was visited as visible, or its creation time.
    #[must_use]
    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    /// Child nodes.
    #[must_use]
    pub fn children(&self) -> &[Node<R>] {
        &self.children
    }

    pub(crate) fn children_mut(&mut self) -> &mut [Node<R>] {
        &mut self.children
    }

    /// Geometry chunks of the node itself.
    #[must_use]
    pub fn chunks(&self) -> &[GeometryChunk<R>] {
        &self.chunks
    }

    /// Find a node in this subtree by key.
    #[must_use]
    pub fn find(&self, key: NodeKey) -> Option<&Node<R>> {
        if self.key == key {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(key))
    }

    /// Load the node's content synchronously.
    ///
    /// Returns [`Error::AlreadyLoaded`] without touching the node if it is
    /// loaded, and [`Error::InvalidDescriptor`] if its descriptor does not
    /// name exactly one resource. A failed read leaves the node unloaded and
    /// the rest of the tree untouched.
    pub fn load(&mut self, cache: &CacheManager) -> Result<()> {
        if self.is_loaded() {
            return Err(Error::AlreadyLoaded);
        }
        let Some(resource) = self.resource.clone() else {
            return Err(Error::InvalidDescriptor {
                resources: self.descriptor.resources.len(),
            });
        };

        match cache.synchronous_read(self, &resource) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(resource = %resource, "Failed to load node: {}", e);
                self.state = LoadState::Unloaded;
                self.failure = Some(LoadFailure::new(&e));
                Err(e)
            }
        }
    }

    /// Integrate content read for this node.
    pub(crate) fn install(&mut self, tile: LoadedTile, keep_compressed: bool) {
        let LoadedTile { children, meshes } = tile;
        let directory = self
            .resource
            .as_ref()
            .map(|r| r.directory().to_owned())
            .unwrap_or_default();

        self.chunks = meshes
            .into_iter()
            .map(|m| GeometryChunk::new(m, keep_compressed))
            .collect();
        self.children = children
            .into_iter()
            .filter(NodeDescriptor::has_resources)
            .map(|d| Node::child(d, self, &directory))
            .collect();
        self.state = if self.chunks.is_empty() {
            LoadState::LoadedEmpty
        } else {
            LoadState::LoadedDisplayable
        };
        self.failure = None;
        self.children_requested = false;

        tracing::debug!(
            key = %self.key,
            resource = ?self.resource.as_ref().map(ResourceId::as_str),
            chunks = self.chunks.len(),
            children = self.children.len(),
            "Node loaded"
        );
    }

    /// Replace this node with a fresh unloaded one after a failed background load.
    ///
    /// Unless the error is permanent the node is requested again once the
    /// configured retry delay has passed.
    pub(crate) fn mark_failed(&mut self, error: &Error) {
        tracing::warn!(
            key = %self.key,
            resource = ?self.resource.as_ref().map(ResourceId::as_str),
            permanent = error.is_permanent(),
            "Background load failed: {}",
            error
        );
        self.key = NodeKey::next();
        self.state = LoadState::Unloaded;
        self.chunks.clear();
        self.children.clear();
        self.children_requested = false;
        self.failure = Some(LoadFailure::new(error));
    }

    /// Discard the subtree and the node's own geometry.
    ///
    /// Every outstanding request in the subtree is cancelled first, so no
    /// background completion can reach the discarded nodes. The node gets a
    /// new key and can be loaded again from its resource.
    pub fn clear(&mut self, cache: &CacheManager) {
        self.cancel_requests(cache);
        self.children.clear();
        self.chunks.clear();
        self.state = LoadState::Unloaded;
        self.pinned = false;
        self.children_requested = false;
        self.failure = (self.resource.is_none() && self.parent.is_some())
            .then(LoadFailure::permanent);
        self.key = NodeKey::next();
    }

    fn cancel_requests(&self, cache: &CacheManager) {
        cache.remove_request(self.key);
        for child in &self.children {
            child.cancel_requests(cache);
        }
    }

    /// Whether any node in the subtree has a request outstanding.
    #[must_use]
    pub fn has_pending_requests(&self, cache: &CacheManager) -> bool {
        cache.is_pending(self.key) || self.children.iter().any(|c| c.has_pending_requests(cache))
    }

    /// Drop GPU resources of the whole subtree, keeping CPU data.
    ///
    /// A node whose chunks could not be rebuilt afterwards discards its
    /// content so it is read again on next need.
    pub fn clear_graphics(&mut self, cache: &CacheManager) {
        for chunk in &mut self.chunks {
            chunk.clear_graphic();
        }
        if !self.chunks.iter().all(GeometryChunk::can_recreate) {
            tracing::debug!(key = %self.key, "Graphics not recreatable, discarding content");
            self.clear(cache);
            return;
        }
        for child in &mut self.children {
            child.clear_graphics(cache);
        }
    }

    /// Whether the node, or failing that its descendants, can display the region.
    ///
    /// True for a node with geometry, and for a loaded subdivision node whose
    /// children are all fully displayable (vacuously so without children).
    #[must_use]
    pub fn is_fully_displayable(&self) -> bool {
        match self.state {
            LoadState::Unloaded => false,
            LoadState::LoadedDisplayable => true,
            LoadState::LoadedEmpty => self.children.iter().all(Node::is_fully_displayable),
        }
    }

    /// Issue or continue loads refining a subdivision node.
    ///
    /// The node is pinned and its children are queued as one batch the first
    /// time; later calls recurse into the children, re-queueing any that were
    /// evicted meanwhile. Returns the number of requests queued.
    pub fn request_refinement(&mut self, cache: &CacheManager) -> usize {
        if !self.is_loaded() || self.is_displayable() {
            return 0;
        }
        self.pinned = true;

        let now = Instant::now();
        let requests: Vec<LoadRequest> = self
            .children
            .iter()
            .filter(|c| c.needs_request(cache, now))
            .filter_map(Node::load_request)
            .collect();

        if !self.children_requested {
            self.children_requested = true;
            return cache.queue_child_load(requests, ViewHint::default());
        }

        let mut queued = if requests.is_empty() {
            0
        } else {
            cache.queue_child_load(requests, ViewHint::default())
        };
        for child in &mut self.children {
            queued += child.request_refinement(cache);
        }
        queued
    }

    /// Whether the node is unloaded, loadable at `now` and not already pending.
    fn needs_request(&self, cache: &CacheManager, now: Instant) -> bool {
        !self.is_loaded()
            && self.may_load(now, cache.config().retry_after)
            && !cache.is_pending(self.key)
    }

    pub(crate) fn load_request(&self) -> Option<LoadRequest> {
        self.resource.as_ref().map(|resource| LoadRequest {
            key: self.key,
            resource: resource.clone(),
            sphere: self.descriptor.sphere,
            lod_metric: self.descriptor.lod_metric,
        })
    }

    /// Block until the subtree is fully displayable.
    ///
    /// Loads the node synchronously if needed, then alternates draining
    /// completions and requesting refinement, sleeping between iterations.
    /// Gives up with [`Error::Incomplete`] after the configured number of
    /// iterations, or as soon as nothing is pending and nothing more can be
    /// requested (for example when a child keeps failing to load).
    pub fn load_until_fully_displayable(&mut self, cache: &CacheManager) -> Result<()> {
        if !self.is_loaded() {
            self.load(cache)?;
        }

        let config = cache.config();
        for iteration in 1..=config.max_poll_iterations {
            cache.process_requests(self);
            if self.is_fully_displayable() {
                tracing::debug!(
                    key = %self.key,
                    iterations = iteration,
                    "Subtree fully displayable"
                );
                return Ok(());
            }

            let queued = self.request_refinement(cache);
            if queued == 0 && !self.has_pending_requests(cache) {
                tracing::warn!(key = %self.key, iterations = iteration, "Refinement stalled");
                return Err(Error::Incomplete {
                    iterations: iteration,
                });
            }
            std::thread::sleep(config.poll_interval);
        }

        Err(Error::Incomplete {
            iterations: config.max_poll_iterations,
        })
    }

    /// Evict loaded nodes not visited since `cutoff`.
    ///
    /// A stale, unpinned node is cleared with its whole subtree. Other nodes
    /// recurse, so a recently used ancestor still sheds stale descendants.
    /// Pinned nodes are never evicted by the sweep. Returns the number of
    /// loaded nodes evicted.
    pub fn flush_stale(&mut self, cutoff: Instant, cache: &CacheManager) -> usize {
        if !self.is_loaded() {
            return 0;
        }
        if self.last_access < cutoff && !self.pinned {
            let evicted = self.node_count();
            tracing::trace!(key = %self.key, evicted, "Flushing stale subtree");
            self.clear(cache);
            return evicted;
        }
        self.children
            .iter_mut()
            .map(|c| c.flush_stale(cutoff, cache))
            .sum()
    }
}
