//! Procedural quadtree terrain served from memory.
//!
//! Every tile covers a square of the ground plane with a small height-field
//! mesh and a JPEG texture colored by elevation. Tiles below the root
//! subdivide into four quadrants until `depth` is reached, and reference
//! their children relative to the dataset directory the same way packaged
//! datasets do.

use std::f64::consts::TAU;
use std::io::Cursor;
use std::sync::Arc;

use glam::{DVec3, Vec2, Vec3};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use meshtree::{MemoryTileReader, ResourceId};
use meshtree_decode::{
    BoundingSphere, CompressedTexture, MeshPayload, NodeDescriptor, TextureFormat, TileContent,
};

/// Directory all generated tiles live in.
pub const DIRECTORY: &str = "Data/Tile_+000_+000";

/// Shape of the generated dataset.
#[derive(Debug, Clone, Copy)]
pub struct TerrainConfig {
    /// Number of subdivision levels below the root.
    pub depth: u32,
    /// Side length of the root tile.
    pub extent: f64,
    /// Largest height above or below the ground plane.
    pub amplitude: f64,
    /// Vertices per tile side.
    pub grid: u32,
    /// Texture pixels per tile side.
    pub texture_size: u32,
    /// On-screen diameter, in pixels, up to which a tile is detailed enough.
    pub lod_metric: f64,
    /// Give the root no geometry of its own.
    pub subdivision_root: bool,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            depth: 4,
            extent: 10_000.0,
            amplitude: 400.0,
            grid: 9,
            texture_size: 32,
            lod_metric: 256.0,
            subdivision_root: false,
        }
    }
}

/// A generated dataset.
pub struct Terrain {
    /// Reader holding every tile.
    pub reader: Arc<MemoryTileReader>,
    /// Descriptor of the root tile.
    pub root: NodeDescriptor,
}

#[derive(Debug, Clone, Copy)]
struct TileCoord {
    level: u32,
    x: u32,
    y: u32,
}

impl TileCoord {
    const ROOT: Self = Self {
        level: 0,
        x: 0,
        y: 0,
    };

    fn file_name(self) -> String {
        if self.level == 0 {
            "root.tile".to_owned()
        } else {
            format!("L{}_{:04}_{:04}.tile", self.level, self.x, self.y)
        }
    }

    fn children(self) -> [Self; 4] {
        let level = self.level + 1;
        let (x, y) = (self.x * 2, self.y * 2);
        [
            Self { level, x, y },
            Self { level, x: x + 1, y },
            Self { level, x, y: y + 1 },
            Self {
                level,
                x: x + 1,
                y: y + 1,
            },
        ]
    }
}

impl TerrainConfig {
    /// Generate every tile into a memory reader.
    pub fn generate(&self) -> Result<Terrain, image::ImageError> {
        let reader = MemoryTileReader::new();
        self.generate_tile(TileCoord::ROOT, &reader)?;
        tracing::info!(
            tiles = reader.len(),
            depth = self.depth,
            extent = self.extent,
            "Generated terrain"
        );

        let root = self.descriptor(TileCoord::ROOT, format!("{DIRECTORY}/root.tile"));
        Ok(Terrain {
            reader: Arc::new(reader),
            root,
        })
    }

    fn generate_tile(
        &self,
        coord: TileCoord,
        reader: &MemoryTileReader,
    ) -> Result<(), image::ImageError> {
        let has_mesh = !(coord.level == 0 && self.subdivision_root);
        let meshes = if has_mesh {
            vec![self.mesh(coord)?]
        } else {
            Vec::new()
        };

        let children = if coord.level < self.depth {
            coord
                .children()
                .into_iter()
                .map(|child| self.descriptor(child, child.file_name()))
                .collect()
        } else {
            Vec::new()
        };

        reader.insert(
            ResourceId::new(format!("{DIRECTORY}/{}", coord.file_name())),
            TileContent { children, meshes },
        );

        if coord.level < self.depth {
            for child in coord.children() {
                self.generate_tile(child, reader)?;
            }
        }
        Ok(())
    }

    fn tile_size(&self, level: u32) -> f64 {
        self.extent / f64::from(1_u32 << level)
    }

    /// Lower corner of a tile on the ground plane.
    fn tile_origin(&self, coord: TileCoord) -> (f64, f64) {
        let size = self.tile_size(coord.level);
        let half = self.extent / 2.0;
        (
            f64::from(coord.x).mul_add(size, -half),
            f64::from(coord.y).mul_add(size, -half),
        )
    }

    fn descriptor(&self, coord: TileCoord, resource: String) -> NodeDescriptor {
        let size = self.tile_size(coord.level);
        let (x0, y0) = self.tile_origin(coord);
        let half = size / 2.0;
        let center = DVec3::new(x0 + half, y0 + half, 0.0);
        let radius = (2.0 * half * half + self.amplitude * self.amplitude).sqrt();
        NodeDescriptor::new(
            format!("{}-{}-{}", coord.level, coord.x, coord.y),
            BoundingSphere::new(center, radius),
            self.lod_metric,
            resource,
        )
    }

    /// Ground elevation at a point.
    pub fn height(&self, x: f64, y: f64) -> f64 {
        let f = TAU / self.extent;
        let broad = (2.0 * f * x).sin() * (3.0 * f * y).cos();
        let ridges = (7.0 * f * x + 1.3).sin() * (5.0 * f * y).sin();
        let detail = (19.0 * f * (x + y)).cos();
        self.amplitude * (0.6 * broad + 0.3 * ridges + 0.1 * detail)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn mesh(&self, coord: TileCoord) -> Result<MeshPayload, image::ImageError> {
        let grid = self.grid.max(2);
        let step = self.tile_size(coord.level) / f64::from(grid - 1);
        let (x0, y0) = self.tile_origin(coord);

        let mut positions = Vec::with_capacity((grid * grid) as usize);
        let mut uvs = Vec::with_capacity(positions.capacity());
        for j in 0..grid {
            for i in 0..grid {
                let x = f64::from(i).mul_add(step, x0);
                let y = f64::from(j).mul_add(step, y0);
                positions.push(Vec3::new(x as f32, y as f32, self.height(x, y) as f32));
                uvs.push(Vec2::new(
                    i as f32 / (grid - 1) as f32,
                    j as f32 / (grid - 1) as f32,
                ));
            }
        }

        let mut indices = Vec::with_capacity(((grid - 1) * (grid - 1) * 6) as usize);
        for j in 0..grid - 1 {
            for i in 0..grid - 1 {
                let a = j * grid + i;
                let b = a + 1;
                let c = a + grid;
                let d = c + 1;
                indices.extend_from_slice(&[a, b, d, a, d, c]);
            }
        }

        Ok(MeshPayload {
            positions,
            normals: Vec::new(),
            uvs,
            indices,
            texture: Some(self.texture(coord)?),
        })
    }

    fn texture(&self, coord: TileCoord) -> Result<CompressedTexture, image::ImageError> {
        let size = self.texture_size.max(1);
        let step = self.tile_size(coord.level) / f64::from(size);
        let (x0, y0) = self.tile_origin(coord);

        let image = RgbImage::from_fn(size, size, |px, py| {
            let x = (f64::from(px) + 0.5).mul_add(step, x0);
            let y = (f64::from(py) + 0.5).mul_add(step, y0);
            elevation_color(self.height(x, y) / self.amplitude.max(f64::EPSILON))
        });

        let mut data = Vec::new();
        DynamicImage::ImageRgb8(image).write_to(&mut Cursor::new(&mut data), ImageFormat::Jpeg)?;
        Ok(CompressedTexture {
            format: TextureFormat::Jpeg,
            data,
        })
    }
}

/// Color ramp over normalized elevation in `[-1, 1]`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn elevation_color(t: f64) -> Rgb<u8> {
    const LOW: [f64; 3] = [60.0, 120.0, 50.0];
    const MID: [f64; 3] = [130.0, 110.0, 80.0];
    const HIGH: [f64; 3] = [235.0, 235.0, 235.0];

    let t = t.clamp(-1.0, 1.0);
    let (from, to, s) = if t < 0.0 {
        (LOW, MID, t + 1.0)
    } else {
        (MID, HIGH, t)
    };
    Rgb(std::array::from_fn(|i| {
        (to[i] - from[i]).mul_add(s, from[i]).round() as u8
    }))
}

#[cfg(test)]
mod tests {
    use meshtree::{ImageDecoder, StandardImageDecoder, TileReader};

    use super::*;

    fn small() -> TerrainConfig {
        TerrainConfig {
            depth: 2,
            texture_size: 8,
            grid: 5,
            ..TerrainConfig::default()
        }
    }

    #[test]
    fn test_generates_full_quadtree() {
        let terrain = small().generate().unwrap();
        // 1 + 4 + 16
        assert_eq!(terrain.reader.len(), 21);
        assert_eq!(terrain.root.single_resource(), Some("Data/Tile_+000_+000/root.tile"));
    }

    #[test]
    fn test_children_resolve_within_directory() {
        let terrain = small().generate().unwrap();
        let root = terrain
            .reader
            .read(&ResourceId::new("Data/Tile_+000_+000/root.tile"))
            .unwrap();
        assert_eq!(root.children.len(), 4);
        for child in &root.children {
            let resource = ResourceId::resolve(DIRECTORY, child.single_resource().unwrap());
            let content = terrain.reader.read(&resource).unwrap();
            assert_eq!(content.children.len(), 4);
        }
    }

    #[test]
    fn test_leaves_have_no_children() {
        let terrain = small().generate().unwrap();
        let leaf = terrain
            .reader
            .read(&ResourceId::new("Data/Tile_+000_+000/L2_0003_0003.tile"))
            .unwrap();
        assert!(leaf.children.is_empty());
        assert_eq!(leaf.meshes.len(), 1);
    }

    #[test]
    fn test_meshes_are_valid_and_inside_their_sphere() {
        let config = small();
        let terrain = config.generate().unwrap();
        let root = terrain
            .reader
            .read(&ResourceId::new("Data/Tile_+000_+000/root.tile"))
            .unwrap();
        for child in &root.children {
            let resource = ResourceId::resolve(DIRECTORY, child.single_resource().unwrap());
            let content = terrain.reader.read(&resource).unwrap();
            let mesh = &content.meshes[0];
            mesh.validate().unwrap();
            assert_eq!(mesh.triangle_count(), 4 * 4 * 2);
            for p in &mesh.positions {
                let distance = child.sphere.center.distance(p.as_dvec3());
                assert!(distance <= child.sphere.radius + 1.0);
            }
        }
    }

    #[test]
    fn test_textures_decode() {
        let terrain = small().generate().unwrap();
        let root = terrain
            .reader
            .read(&ResourceId::new("Data/Tile_+000_+000/root.tile"))
            .unwrap();
        let texture = root.meshes[0].texture.as_ref().unwrap();
        let image = StandardImageDecoder.decode(texture).unwrap();
        assert_eq!((image.width, image.height), (8, 8));
        assert!(!image.has_alpha);
    }

    #[test]
    fn test_subdivision_root_has_no_mesh() {
        let terrain = TerrainConfig {
            subdivision_root: true,
            ..small()
        }
        .generate()
        .unwrap();
        let root = terrain
            .reader
            .read(&ResourceId::new("Data/Tile_+000_+000/root.tile"))
            .unwrap();
        assert!(root.meshes.is_empty());
        assert_eq!(root.children.len(), 4);
    }

    #[test]
    fn test_elevation_ramp_endpoints() {
        assert_eq!(elevation_color(-1.0), Rgb([60, 120, 50]));
        assert_eq!(elevation_color(0.0), Rgb([130, 110, 80]));
        assert_eq!(elevation_color(1.0), Rgb([235, 235, 235]));
        assert_eq!(elevation_color(5.0), Rgb([235, 235, 235]));
    }
}
