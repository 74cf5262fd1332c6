//! Headless render system that only counts work.

use meshtree::{DecodedImage, MeshPayload, RenderSystem, ResourceId};

/// A mesh as the counting renderer sees it.
#[derive(Debug, Clone, Copy)]
pub struct CountedGraphic {
    triangles: usize,
    texture_bytes: usize,
}

/// Per-frame and cumulative counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCounters {
    /// Textures uploaded.
    pub textures_uploaded: usize,
    /// Texture bytes uploaded.
    pub texture_bytes_uploaded: usize,
    /// Graphics created.
    pub graphics_created: usize,
    /// Draw calls issued.
    pub draw_calls: usize,
    /// Triangles submitted.
    pub triangles: usize,
    /// Texture bytes referenced by draw calls.
    pub texture_bytes_drawn: usize,
    /// Nodes that drew their own geometry.
    pub nodes: usize,
}

impl FrameCounters {
    fn add(&mut self, other: &Self) {
        self.textures_uploaded += other.textures_uploaded;
        self.texture_bytes_uploaded += other.texture_bytes_uploaded;
        self.graphics_created += other.graphics_created;
        self.draw_calls += other.draw_calls;
        self.triangles += other.triangles;
        self.texture_bytes_drawn += other.texture_bytes_drawn;
        self.nodes += other.nodes;
    }
}

/// Render system for runs without a GPU.
#[derive(Debug, Default)]
pub struct CountingRenderer {
    frame: FrameCounters,
    total: FrameCounters,
    frames: usize,
}

impl CountingRenderer {
    /// Close the current frame, returning its counters.
    pub fn end_frame(&mut self) -> FrameCounters {
        let frame = std::mem::take(&mut self.frame);
        self.total.add(&frame);
        self.frames += 1;
        frame
    }

    /// Counters summed over every finished frame.
    pub fn total(&self) -> FrameCounters {
        self.total
    }

    /// Number of finished frames.
    pub fn frames(&self) -> usize {
        self.frames
    }
}

impl RenderSystem for CountingRenderer {
    type Texture = usize;
    type Graphic = CountedGraphic;

    fn create_texture(&mut self, image: &DecodedImage) -> usize {
        self.frame.textures_uploaded += 1;
        self.frame.texture_bytes_uploaded += image.byte_size();
        image.byte_size()
    }

    fn create_graphic(&mut self, mesh: &MeshPayload, texture: Option<&usize>) -> CountedGraphic {
        self.frame.graphics_created += 1;
        CountedGraphic {
            triangles: mesh.triangle_count(),
            texture_bytes: texture.copied().unwrap_or(0),
        }
    }

    fn draw(&mut self, graphic: &CountedGraphic) {
        self.frame.draw_calls += 1;
        self.frame.triangles += graphic.triangles;
        self.frame.texture_bytes_drawn += graphic.texture_bytes;
    }

    fn finish_node(&mut self, _resource: Option<&ResourceId>) {
        self.frame.nodes += 1;
    }
}
