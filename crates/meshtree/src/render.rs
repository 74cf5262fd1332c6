//! Render system boundary.

use meshtree_decode::{DecodedImage, MeshPayload};

use crate::resource::ResourceId;

/// Creates and draws GPU resources on the consumer thread.
///
/// Resources are owned by the returned values and released when they are
/// dropped, so a chunk dropping its `Graphic` frees the GPU side.
pub trait RenderSystem {
    /// GPU texture resource.
    type Texture;
    /// GPU geometry resource, bound to its texture if any.
    type Graphic;

    /// Upload pixels. The caller may release its CPU copy afterwards.
    fn create_texture(&mut self, image: &DecodedImage) -> Self::Texture;

    /// Upload geometry.
    fn create_graphic(&mut self, mesh: &MeshPayload, texture: Option<&Self::Texture>)
    -> Self::Graphic;

    /// Draw previously created geometry.
    fn draw(&mut self, graphic: &Self::Graphic);

    /// Called after a node has drawn all of its own geometry.
    fn finish_node(&mut self, _resource: Option<&ResourceId>) {}
}
