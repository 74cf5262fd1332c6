//! Per-pass visibility, LOD and draw decision.

use web_time::Instant;

use super::{LoadState, Node};
use crate::cache::{CacheManager, LoadRequest, ViewHint};
use crate::render::RenderSystem;
use crate::view::{View, projected_diameter};

/// How a traversal obtains missing children and what it keeps afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawMode {
    /// Visible unloaded children are queued for background loading.
    Interactive,
    /// Visible unloaded children are loaded in place, and nodes that drew
    /// their own geometry are evicted unless pinned. LOD uses a fixed pixel
    /// size instead of the view's.
    Export {
        /// Pixel size in dataset units.
        resolution: f64,
    },
}

/// Everything one traversal pass needs.
pub struct DrawContext<'a, R: RenderSystem> {
    /// Receives GPU uploads and draw calls.
    pub render: &'a mut R,
    /// Visibility and resolution queries.
    pub view: &'a dyn View,
    /// Cache manager for loads and cancellation.
    pub cache: &'a CacheManager,
    /// Timestamp recorded on visited nodes.
    pub now: Instant,
    /// Traversal mode.
    pub mode: DrawMode,
}

impl<'a, R: RenderSystem> DrawContext<'a, R> {
    /// Context for an interactive frame.
    pub fn interactive(render: &'a mut R, view: &'a dyn View, cache: &'a CacheManager) -> Self {
        Self {
            render,
            view,
            cache,
            now: Instant::now(),
            mode: DrawMode::Interactive,
        }
    }

    /// Context for a fixed-resolution export pass.
    pub fn export(
        render: &'a mut R,
        view: &'a dyn View,
        cache: &'a CacheManager,
        resolution: f64,
    ) -> Self {
        Self {
            render,
            view,
            cache,
            now: Instant::now(),
            mode: DrawMode::Export { resolution },
        }
    }

    /// Override the access timestamp.
    #[must_use]
    pub fn with_now(mut self, now: Instant) -> Self {
        self.now = now;
        self
    }

    fn is_export(&self) -> bool {
        matches!(self.mode, DrawMode::Export { .. })
    }

    fn pixel_size_at(&self, point: glam::DVec3) -> f64 {
        match self.mode {
            DrawMode::Export { resolution } => resolution,
            DrawMode::Interactive => self.view.pixel_size_at(point),
        }
    }
}

/// Summary of one draw pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStats {
    /// Visible, loaded nodes visited.
    pub visited: usize,
    /// Nodes whose own geometry was drawn.
    pub nodes_drawn: usize,
    /// Geometry chunks drawn.
    pub chunks_drawn: usize,
    /// Children handed to the cache manager.
    pub children_queued: usize,
    /// Children loaded synchronously.
    pub children_loaded: usize,
    /// Nodes evicted after drawing.
    pub evicted: usize,
}

impl<R: RenderSystem> Node<R> {
    /// Draw the subtree for the current view.
    ///
    /// Unloaded and invisible nodes are skipped. A visible node delegates to
    /// its children when it is too coarse (or has no geometry) and every
    /// visible child is loaded; otherwise it draws its own chunks and gets
    /// the missing children loaded according to the context's mode.
    ///
    /// In interactive mode a node with geometry also keeps drawing itself
    /// while a visible child is loaded but has nothing to show yet, that is
    /// while the visible part of the child's subtree is still streaming in.
    pub fn draw(&mut self, ctx: &mut DrawContext<'_, R>) -> DrawStats {
        let mut stats = DrawStats::default();
        self.draw_node(ctx, &mut stats);
        stats
    }

    fn draw_node(&mut self, ctx: &mut DrawContext<'_, R>, stats: &mut DrawStats) {
        if !self.is_loaded() || !ctx.view.is_sphere_visible(&self.descriptor.sphere) {
            return;
        }
        self.last_access = ctx.now;
        stats.visited += 1;

        let pixel_size = ctx.pixel_size_at(self.descriptor.sphere.center);
        let fine_enough =
            projected_diameter(&self.descriptor.sphere, pixel_size) <= self.descriptor.lod_metric;

        if (!fine_enough || !self.is_displayable()) && !self.children.is_empty() {
            let missing = self.fetch_visible_children(ctx, pixel_size, stats);
            if missing == 0 {
                tracing::trace!(key = %self.key, "Delegating to children");
                for child in &mut self.children {
                    child.draw_node(ctx, stats);
                }
                return;
            }
            tracing::trace!(key = %self.key, missing, "Children incomplete, drawing fallback");
        }

        if !self.chunks.is_empty() {
            let decoder = ctx.cache.decoder();
            for chunk in &mut self.chunks {
                chunk.draw(ctx.render, decoder);
            }
            ctx.render.finish_node(self.resource.as_ref());
            stats.nodes_drawn += 1;
            stats.chunks_drawn += self.chunks.len();
        }

        if ctx.is_export() && !self.pinned {
            self.clear(ctx.cache);
            stats.evicted += 1;
        }
    }

    /// Stamp visible children and get unloaded ones loading.
    ///
    /// Returns how many visible children this node cannot delegate to yet:
    /// unloaded ones, and in interactive mode loaded ones that cannot cover
    /// their visible region while this node has geometry to fall back on.
    fn fetch_visible_children(
        &mut self,
        ctx: &mut DrawContext<'_, R>,
        pixel_size: f64,
        stats: &mut DrawStats,
    ) -> usize {
        let export = ctx.is_export();
        let fallback = !export && self.is_displayable();
        let retry_after = ctx.cache.config().retry_after;
        let mut requests: Vec<LoadRequest> = Vec::new();
        let mut missing = 0;

        for child in &mut self.children {
            if !ctx.view.is_sphere_visible(&child.descriptor.sphere) {
                continue;
            }
            // Seen as visible this pass, even while still streaming in.
            child.last_access = ctx.now;
            if child.is_loaded() {
                if fallback && !child.covers_view(ctx.view) {
                    child.prefetch(ctx, stats);
                    missing += 1;
                }
                continue;
            }

            if export {
                if child.may_load(ctx.now, retry_after) && child.load(ctx.cache).is_ok() {
                    stats.children_loaded += 1;
                    continue;
                }
            } else if child.needs_request(ctx.cache, ctx.now) {
                requests.extend(child.load_request());
            }
            missing += 1;
        }

        if !requests.is_empty() {
            stats.children_queued += ctx
                .cache
                .queue_child_load(requests, ViewHint::new(pixel_size));
        }
        missing
    }

    /// Whether the visible part of the subtree has geometry to show.
    fn covers_view(&self, view: &dyn View) -> bool {
        match self.state {
            LoadState::Unloaded => false,
            LoadState::LoadedDisplayable => true,
            LoadState::LoadedEmpty => self
                .children
                .iter()
                .filter(|c| view.is_sphere_visible(&c.descriptor.sphere))
                .all(|c| c.covers_view(view)),
        }
    }

    /// Keep loads going below a loaded node that is not drawn this pass.
    fn prefetch(&mut self, ctx: &mut DrawContext<'_, R>, stats: &mut DrawStats) {
        let pixel_size = ctx.pixel_size_at(self.descriptor.sphere.center);
        self.fetch_visible_children(ctx, pixel_size, stats);
        for child in &mut self.children {
            if child.is_loaded()
                && ctx.view.is_sphere_visible(&child.descriptor.sphere)
                && !child.covers_view(ctx.view)
            {
                child.prefetch(ctx, stats);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use glam::DVec3;

    use super::*;
    use crate::config::StreamConfig;
    use crate::test_support::{
        DatasetShape, MockRender, MockView, cache_for, cache_with, child_center, dataset,
        root_descriptor, wait_until,
    };

    type TestNode = Node<MockRender>;

    #[test]
    fn test_draw_skips_unloaded_node() {
        let reader = dataset(DatasetShape::default());
        let cache = cache_for(&reader);
        let mut root = TestNode::root(root_descriptor());
        let created = root.last_access();

        let mut render = MockRender::default();
        let view = MockView::new(0.01);
        let stats = root.draw(&mut DrawContext::interactive(&mut render, &view, &cache));

        assert_eq!(stats, DrawStats::default());
        assert_eq!(render.graphics_created, 0);
        assert_eq!(root.last_access(), created);
        assert_eq!(cache.pending_count(), 0);
    }

    #[test]
    fn test_draw_skips_invisible_node() {
        let reader = dataset(DatasetShape::default());
        let cache = cache_for(&reader);
        let mut root = TestNode::root(root_descriptor());
        root.load(&cache).unwrap();
        let created = root.last_access();

        let mut render = MockRender::default();
        let view = MockView::new(0.01).hide(DVec3::ZERO);
        let stats = root.draw(&mut DrawContext::interactive(&mut render, &view, &cache));

        assert_eq!(stats, DrawStats::default());
        assert!(render.draws.is_empty());
        assert_eq!(root.last_access(), created);
        assert!(root.children().iter().all(|c| !c.is_loaded()));
        assert_eq!(cache.pending_count(), 0);
    }

    #[test]
    fn test_fine_enough_root_draws_only_itself() {
        let reader = dataset(DatasetShape::default());
        let cache = cache_for(&reader);
        let mut root = TestNode::root(root_descriptor());
        root.load(&cache).unwrap();

        // Radius 100 at 1000 units per pixel projects to 0.2 px, below the metric of 1.0.
        let mut render = MockRender::default();
        let view = MockView::new(1000.0);
        let stats = root.draw(&mut DrawContext::interactive(&mut render, &view, &cache));

        assert_eq!(stats.visited, 1);
        assert_eq!(stats.nodes_drawn, 1);
        assert_eq!(stats.children_queued, 0);
        assert_eq!(render.finished, vec![root.resource().cloned()]);
        assert_eq!(cache.pending_count(), 0);
        assert!(root.children().iter().all(|c| !c.is_loaded()));
    }

    fn coarse_view_with_one_visible_child() -> MockView {
        MockView::new(0.01)
            .hide(child_center(1))
            .hide(child_center(2))
            .hide(child_center(3))
    }

    #[test]
    fn test_interactive_queues_visible_child_and_draws_fallback() {
        let reader = dataset(DatasetShape::default());
        let cache = cache_for(&reader);
        let mut root = TestNode::root(root_descriptor());
        root.load(&cache).unwrap();

        let mut render = MockRender::default();
        let view = coarse_view_with_one_visible_child();
        let stats = root.draw(&mut DrawContext::interactive(&mut render, &view, &cache));

        assert_eq!(stats.nodes_drawn, 1);
        assert_eq!(stats.children_queued, 1);
        assert_eq!(render.finished, vec![root.resource().cloned()]);
        assert!(cache.is_pending(root.children()[0].key()));
        assert!(root.children()[1..].iter().all(|c| !cache.is_pending(c.key())));

        // A second pass does not queue the pending child again.
        let stats = root.draw(&mut DrawContext::interactive(&mut render, &view, &cache));
        assert_eq!(stats.children_queued, 0);
    }

    #[test]
    fn test_interactive_delegates_once_children_arrive() {
        let reader = dataset(DatasetShape::default());
        let cache = cache_for(&reader);
        let mut root = TestNode::root(root_descriptor());
        root.load(&cache).unwrap();

        let mut render = MockRender::default();
        let view = coarse_view_with_one_visible_child();
        root.draw(&mut DrawContext::interactive(&mut render, &view, &cache));
        assert!(crate::test_support::wait_until(|| {
            cache.process_requests(&mut root);
            root.children()[0].is_loaded()
        }));

        let mut render = MockRender::default();
        let stats = root.draw(&mut DrawContext::interactive(&mut render, &view, &cache));
        assert_eq!(stats.nodes_drawn, 1);
        assert_eq!(
            render.finished,
            vec![root.children()[0].resource().cloned()]
        );
    }

    #[test]
    fn test_parent_covers_until_visible_grandchildren_arrive() {
        let reader = dataset(DatasetShape {
            child_mesh: false,
            grandchildren: true,
            ..DatasetShape::default()
        });
        let cache = cache_for(&reader);
        let mut root = TestNode::root(root_descriptor());
        root.load(&cache).unwrap();
        root.children_mut()[0].load(&cache).unwrap();

        // The last grandchild of child 0 is off screen and never needed.
        let view = coarse_view_with_one_visible_child().hide(DVec3::new(-25.0, -25.0, 0.0));
        let mut render = MockRender::default();
        let stats = root.draw(&mut DrawContext::interactive(&mut render, &view, &cache));

        assert_eq!(stats.children_queued, 3);
        assert_eq!(render.finished, vec![root.resource().cloned()]);

        assert!(wait_until(|| {
            cache.process_requests(&mut root);
            root.children()[0].children()[..3]
                .iter()
                .all(TestNode::is_loaded)
        }));

        let mut render = MockRender::default();
        let stats = root.draw(&mut DrawContext::interactive(&mut render, &view, &cache));
        assert_eq!(stats.nodes_drawn, 3);
        assert!(!render.finished.contains(&root.resource().cloned()));
        assert!(!root.children()[0].children()[3].is_loaded());
    }

    #[test]
    fn test_export_loads_visible_child_and_delegates() {
        let reader = dataset(DatasetShape::default());
        let cache = cache_for(&reader);
        let mut root = TestNode::root(root_descriptor());
        root.load(&cache).unwrap();
        let child_resource = root.children()[0].resource().cloned();

        let mut render = MockRender::default();
        let view = coarse_view_with_one_visible_child();
        let stats = root.draw(&mut DrawContext::export(&mut render, &view, &cache, 0.01));

        assert_eq!(stats.children_loaded, 1);
        assert_eq!(stats.children_queued, 0);
        assert_eq!(render.finished, vec![child_resource]);
        // The child drew its geometry and was evicted; the root delegated.
        assert_eq!(stats.evicted, 1);
        assert!(root.is_loaded());
        assert!(!root.children()[0].is_loaded());
        assert_eq!(cache.pending_count(), 0);
    }

    #[test]
    fn test_export_keeps_pinned_node() {
        let reader = dataset(DatasetShape::default());
        let cache = cache_for(&reader);
        let mut root = TestNode::root(root_descriptor());
        root.load(&cache).unwrap();
        root.set_pinned(true);

        let mut render = MockRender::default();
        let view = MockView::new(1000.0);
        let stats = root.draw(&mut DrawContext::export(&mut render, &view, &cache, 1000.0));

        assert_eq!(stats.nodes_drawn, 1);
        assert_eq!(stats.evicted, 0);
        assert!(root.is_loaded());
    }

    #[test]
    fn test_failed_child_is_not_requeued_before_retry_delay() {
        let reader = dataset(DatasetShape::default());
        reader.remove(&crate::ResourceId::new("Data/child_0.tile"));
        let cache = cache_for(&reader);
        let mut root = TestNode::root(root_descriptor());
        root.load(&cache).unwrap();

        let mut render = MockRender::default();
        let view = coarse_view_with_one_visible_child();
        root.draw(&mut DrawContext::interactive(&mut render, &view, &cache));
        assert!(crate::test_support::wait_until(|| {
            cache.process_requests(&mut root);
            root.children()[0].load_failed()
        }));

        let stats = root.draw(&mut DrawContext::interactive(&mut render, &view, &cache));
        assert_eq!(stats.children_queued, 0);
        assert_eq!(stats.nodes_drawn, 1);
    }

    #[test]
    fn test_failed_child_is_retried_once_resource_returns() {
        let reader = dataset(DatasetShape::default());
        let child_resource = crate::ResourceId::new("Data/child_0.tile");
        let content = reader.remove(&child_resource).unwrap();
        let cache = cache_with(
            &reader,
            StreamConfig::default()
                .with_worker_threads(2)
                .with_retry_after(Duration::from_millis(20)),
        );
        let mut root = TestNode::root(root_descriptor());
        root.load(&cache).unwrap();

        let mut render = MockRender::default();
        let view = coarse_view_with_one_visible_child();
        root.draw(&mut DrawContext::interactive(&mut render, &view, &cache));
        assert!(wait_until(|| {
            cache.process_requests(&mut root);
            root.children()[0].load_failed()
        }));

        reader.insert(child_resource.clone(), content);
        assert!(wait_until(|| {
            cache.process_requests(&mut root);
            root.draw(&mut DrawContext::interactive(&mut render, &view, &cache));
            root.children()[0].is_loaded()
        }));
        assert!(!root.children()[0].load_failed());

        // With the child in place the root delegates to it.
        let mut render = MockRender::default();
        root.draw(&mut DrawContext::interactive(&mut render, &view, &cache));
        assert_eq!(render.finished, vec![Some(child_resource)]);
    }
}
