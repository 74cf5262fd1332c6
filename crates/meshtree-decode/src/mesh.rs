//! Mesh payloads as delivered by a tile reader.

use glam::{Vec2, Vec3};

use crate::bounds::Range3;
use crate::error::{DecodeError, DecodeResult};
use crate::texture::CompressedTexture;

/// Geometry for one drawable part of a tile, before GPU upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshPayload {
    /// Vertex positions.
    pub positions: Vec<Vec3>,
    /// Per-vertex normals. Empty if the tile carries none.
    pub normals: Vec<Vec3>,
    /// Per-vertex texture coordinates. Empty if untextured.
    pub uvs: Vec<Vec2>,
    /// Triangle list indices.
    pub indices: Vec<u32>,
    /// Compressed texture referenced by the UVs.
    pub texture: Option<CompressedTexture>,
}

impl MeshPayload {
    /// Number of triangles.
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Check that attribute arrays agree and every index is in range.
    pub fn validate(&self) -> DecodeResult<()> {
        let vertex_count = self.positions.len();

        if !self.normals.is_empty() && self.normals.len() != vertex_count {
            return Err(DecodeError::AttributeMismatch {
                attribute: "normal",
                expected: vertex_count,
                actual: self.normals.len(),
            });
        }
        if !self.uvs.is_empty() && self.uvs.len() != vertex_count {
            return Err(DecodeError::AttributeMismatch {
                attribute: "uv",
                expected: vertex_count,
                actual: self.uvs.len(),
            });
        }
        if self.indices.len() % 3 != 0 {
            return Err(DecodeError::InvalidFormat {
                context: "indices",
                detail: format!("{} indices is not a triangle list", self.indices.len()),
            });
        }
        if let Some(&index) = self.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(DecodeError::IndexOutOfBounds {
                index: index as usize,
                len: vertex_count,
            });
        }
        Ok(())
    }

    /// Fill in smooth vertex normals when the tile did not provide any.
    pub fn ensure_normals(&mut self) {
        if self.normals.is_empty() && !self.positions.is_empty() {
            self.normals = compute_vertex_normals(&self.positions, &self.indices);
        }
    }

    /// Axis-aligned range of the positions.
    #[must_use]
    pub fn range(&self) -> Option<Range3> {
        Range3::from_points(&self.positions)
    }

    /// Bytes held by the vertex and index buffers.
    #[must_use]
    pub fn geometry_size(&self) -> usize {
        self.positions.len() * size_of::<Vec3>()
            + self.normals.len() * size_of::<Vec3>()
            + self.uvs.len() * size_of::<Vec2>()
            + self.indices.len() * size_of::<u32>()
    }
}

/// Area-weighted smooth normals for an indexed triangle list.
///
/// Vertices not referenced by any triangle get `Vec3::Z`.
#[must_use]
pub fn compute_vertex_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];

    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        if a >= positions.len() || b >= positions.len() || c >= positions.len() {
            continue;
        }
        // Cross product length is twice the triangle area.
        let face = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
        normals[a] += face;
        normals[b] += face;
        normals[c] += face;
    }

    normals
        .into_iter()
        .map(|n| n.try_normalize().unwrap_or(Vec3::Z))
        .collect()
}
