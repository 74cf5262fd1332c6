//! Bulk extraction at a fixed resolution.
//!
//! The [`Extractor`] walks a tree in export mode: missing children are read
//! synchronously, every node whose own geometry is reached is emitted as an
//! [`ExtractedTile`], and nodes are evicted as soon as they have been
//! emitted so memory stays bounded on large datasets.

use std::sync::Arc;

use meshtree_decode::{BoundingSphere, DecodedImage, MeshPayload};

use crate::cache::CacheManager;
use crate::error::{Error, Result};
use crate::node::{DrawContext, DrawStats, Node};
use crate::render::RenderSystem;
use crate::resource::ResourceId;
use crate::view::FixedResolutionView;

/// Geometry of one node reached by an extraction.
#[derive(Debug, Clone)]
pub struct ExtractedTile {
    /// Column of the output tile being extracted.
    pub tile_x: i32,
    /// Row of the output tile being extracted.
    pub tile_y: i32,
    /// Resource the geometry came from.
    pub resource: Option<ResourceId>,
    /// Meshes, in draw order.
    pub geometries: Vec<Arc<MeshPayload>>,
    /// Texture of each mesh, parallel to `geometries`.
    pub textures: Vec<Option<Arc<DecodedImage>>>,
}

impl ExtractedTile {
    /// Total triangles over all meshes.
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.geometries.iter().map(|g| g.triangle_count()).sum()
    }
}

/// Uploaded geometry as seen by the collector.
#[derive(Debug, Clone)]
pub struct ExportGraphic {
    mesh: Arc<MeshPayload>,
    texture: Option<Arc<DecodedImage>>,
}

/// Render system that collects geometry instead of drawing it.
#[derive(Debug, Default)]
pub struct ExportCollector {
    tile_x: i32,
    tile_y: i32,
    geometries: Vec<Arc<MeshPayload>>,
    textures: Vec<Option<Arc<DecodedImage>>>,
    tiles: Vec<ExtractedTile>,
}

impl ExportCollector {
    /// Collector for one output tile.
    #[must_use]
    pub fn new(tile_x: i32, tile_y: i32) -> Self {
        Self {
            tile_x,
            tile_y,
            ..Self::default()
        }
    }

    /// Tiles emitted so far.
    #[must_use]
    pub fn tiles(&self) -> &[ExtractedTile] {
        &self.tiles
    }

    /// Consume the collector, returning the emitted tiles.
    #[must_use]
    pub fn into_tiles(self) -> Vec<ExtractedTile> {
        self.tiles
    }
}

impl RenderSystem for ExportCollector {
    type Texture = Arc<DecodedImage>;
    type Graphic = ExportGraphic;

    fn create_texture(&mut self, image: &DecodedImage) -> Arc<DecodedImage> {
        Arc::new(image.clone())
    }

    fn create_graphic(
        &mut self,
        mesh: &MeshPayload,
        texture: Option<&Arc<DecodedImage>>,
    ) -> ExportGraphic {
        ExportGraphic {
            mesh: Arc::new(mesh.clone()),
            texture: texture.cloned(),
        }
    }

    fn draw(&mut self, graphic: &ExportGraphic) {
        self.geometries.push(Arc::clone(&graphic.mesh));
        self.textures.push(graphic.texture.clone());
    }

    fn finish_node(&mut self, resource: Option<&ResourceId>) {
        if self.geometries.is_empty() {
            return;
        }
        self.tiles.push(ExtractedTile {
            tile_x: self.tile_x,
            tile_y: self.tile_y,
            resource: resource.cloned(),
            geometries: std::mem::take(&mut self.geometries),
            textures: std::mem::take(&mut self.textures),
        });
    }
}

/// Result of one extraction.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Emitted tiles.
    pub tiles: Vec<ExtractedTile>,
    /// Traversal counters.
    pub stats: DrawStats,
}

/// Extracts geometry at a fixed resolution.
#[derive(Debug, Clone, Copy)]
pub struct Extractor {
    resolution: f64,
    bounds: Option<BoundingSphere>,
}

impl Extractor {
    /// Extract with one pixel spanning `resolution` dataset units.
    #[must_use]
    pub fn new(resolution: f64) -> Self {
        Self {
            resolution,
            bounds: None,
        }
    }

    /// Only extract nodes whose sphere intersects `bounds`.
    #[must_use]
    pub fn with_bounds(mut self, bounds: BoundingSphere) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// Extract one output tile from the tree under `root`.
    ///
    /// The root is loaded until fully displayable first; if that stalls
    /// (a child that cannot be read), extraction continues with what is
    /// available.
    pub fn extract(
        &self,
        root: &mut Node<ExportCollector>,
        tile_x: i32,
        tile_y: i32,
        cache: &CacheManager,
    ) -> Result<Extraction> {
        match root.load_until_fully_displayable(cache) {
            Ok(()) => {}
            Err(Error::Incomplete { iterations }) => {
                tracing::warn!(
                    tile_x,
                    tile_y,
                    iterations,
                    "Root not fully displayable, extracting what is available"
                );
            }
            Err(e) => return Err(e),
        }

        let mut view = FixedResolutionView::new(self.resolution);
        if let Some(bounds) = self.bounds {
            view = view.with_bounds(bounds);
        }

        let mut collector = ExportCollector::new(tile_x, tile_y);
        let stats = root.draw(&mut DrawContext::export(
            &mut collector,
            &view,
            cache,
            self.resolution,
        ));
        let tiles = collector.into_tiles();

        tracing::info!(
            tile_x,
            tile_y,
            tiles = tiles.len(),
            loaded = stats.children_loaded,
            evicted = stats.evicted,
            "Extraction finished"
        );
        Ok(Extraction { tiles, stats })
    }
}
