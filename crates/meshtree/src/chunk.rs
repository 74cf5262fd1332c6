//! Drawable geometry owned by a node.

use meshtree_decode::{
    CompressedTexture, DecodeResult, DecodedImage, MeshPayload, NodeDescriptor, Range3,
    TileContent,
};

use crate::reader::ImageDecoder;
use crate::render::RenderSystem;

/// A mesh decoded off the consumer thread, ready to become a chunk.
#[derive(Debug, Clone)]
pub struct DecodedMesh {
    /// Geometry, without its texture.
    pub mesh: MeshPayload,
    /// The texture as stored in the tile.
    pub compressed: Option<CompressedTexture>,
    /// The decoded texture pixels.
    pub image: Option<DecodedImage>,
}

impl DecodedMesh {
    /// Split off and decode the mesh's texture.
    pub fn decode(mut mesh: MeshPayload, decoder: &dyn ImageDecoder) -> DecodeResult<Self> {
        let compressed = mesh.texture.take();
        let image = compressed.as_ref().map(|c| decoder.decode(c)).transpose()?;
        Ok(Self {
            mesh,
            compressed,
            image,
        })
    }
}

/// Everything read for one node, ready for integration.
#[derive(Debug, Clone, Default)]
pub struct LoadedTile {
    /// Child descriptors listed by the tile.
    pub children: Vec<NodeDescriptor>,
    /// Decoded meshes of the tile itself.
    pub meshes: Vec<DecodedMesh>,
}

impl LoadedTile {
    /// Validate parsed content and decode its textures.
    pub fn decode(
        content: TileContent,
        decoder: &dyn ImageDecoder,
        compute_missing_normals: bool,
    ) -> DecodeResult<Self> {
        content.validate()?;
        let TileContent { children, meshes } = content;
        let meshes = meshes
            .into_iter()
            .map(|mut mesh| {
                if compute_missing_normals {
                    mesh.ensure_normals();
                }
                DecodedMesh::decode(mesh, decoder)
            })
            .collect::<DecodeResult<Vec<_>>>()?;
        Ok(Self { children, meshes })
    }
}

/// One drawable unit: vertex, normal, UV and index buffers plus an
/// optional texture.
///
/// CPU geometry never changes after construction. GPU resources are created
/// on the first draw and can be dropped with [`GeometryChunk::clear_graphic`];
/// the next draw recreates them.
pub struct GeometryChunk<R: RenderSystem> {
    mesh: MeshPayload,
    range: Option<Range3>,
    compressed: Option<CompressedTexture>,
    pixels: Option<DecodedImage>,
    /// Dimensions of the texture, known even after the pixels are released.
    texture_extent: Option<(u32, u32)>,
    keep_compressed: bool,
    texture: Option<R::Texture>,
    graphic: Option<R::Graphic>,
}

impl<R: RenderSystem> GeometryChunk<R> {
    /// Build a chunk from a decoded mesh.
    ///
    /// With `keep_compressed` false the compressed texture is released on
    /// upload, after which cleared graphics cannot be rebuilt.
    #[must_use]
    pub fn new(decoded: DecodedMesh, keep_compressed: bool) -> Self {
        let DecodedMesh {
            mesh,
            compressed,
            image,
        } = decoded;
        let range = mesh.range();
        let texture_extent = image.as_ref().map(|i| (i.width, i.height));
        Self {
            mesh,
            range,
            compressed,
            pixels: image,
            texture_extent,
            keep_compressed,
            texture: None,
            graphic: None,
        }
    }

    /// CPU geometry.
    #[must_use]
    pub fn mesh(&self) -> &MeshPayload {
        &self.mesh
    }

    /// Whether the chunk carries a texture.
    #[must_use]
    pub fn is_textured(&self) -> bool {
        self.texture_extent.is_some()
    }

    /// True iff the GPU resources currently exist.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.graphic.is_some()
    }

    /// Whether GPU resources can be (re)created from what the chunk still holds.
    #[must_use]
    pub fn can_recreate(&self) -> bool {
        self.is_cached()
            || !self.is_textured()
            || self.texture.is_some()
            || self.pixels.is_some()
            || self.compressed.is_some()
    }

    /// Drop GPU resources, keeping CPU data for a later re-upload.
    pub fn clear_graphic(&mut self) {
        self.graphic = None;
        self.texture = None;
    }

    /// Draw the chunk, uploading GPU resources first if needed.
    pub fn draw(&mut self, render: &mut R, decoder: &dyn ImageDecoder) {
        if self.graphic.is_none() {
            if self.is_textured() && self.texture.is_none() {
                self.upload_texture(render, decoder);
            }
            self.graphic = Some(render.create_graphic(&self.mesh, self.texture.as_ref()));
        }
        if let Some(graphic) = &self.graphic {
            render.draw(graphic);
        }
    }

    fn upload_texture(&mut self, render: &mut R, decoder: &dyn ImageDecoder) {
        let image = match (self.pixels.take(), &self.compressed) {
            (Some(image), _) => image,
            (None, Some(compressed)) => match decoder.decode(compressed) {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!("Failed to re-decode chunk texture: {}", e);
                    return;
                }
            },
            (None, None) => {
                tracing::debug!("Chunk texture released, drawing untextured");
                return;
            }
        };

        self.texture = Some(render.create_texture(&image));
        if !self.keep_compressed {
            self.compressed = None;
        }
    }

    /// Bytes held by geometry and texture data, CPU and GPU.
    #[must_use]
    pub fn memory_size(&self) -> usize {
        self.mesh.geometry_size() + self.texture_memory_size()
    }

    /// Bytes held by texture data: compressed copy, pending pixels and
    /// uploaded texture.
    #[must_use]
    pub fn texture_memory_size(&self) -> usize {
        let compressed = self.compressed.as_ref().map_or(0, |c| c.data.len());
        let pixels = self.pixels.as_ref().map_or(0, DecodedImage::byte_size);
        let uploaded = match (&self.texture, self.texture_extent) {
            (Some(_), Some((w, h))) => (w as usize) * (h as usize) * 4,
            _ => 0,
        };
        compressed + pixels + uploaded
    }

    /// Axis-aligned range of the vertex positions.
    #[must_use]
    pub fn range(&self) -> Option<Range3> {
        self.range
    }
}
