//! Mock collaborators and small datasets shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use glam::{DVec3, Vec2, Vec3};
use meshtree_decode::{
    BoundingSphere, CompressedTexture, DecodeResult, DecodedImage, MeshPayload, NodeDescriptor,
    TextureFormat, TileContent,
};

use crate::cache::CacheManager;
use crate::config::StreamConfig;
use crate::error::Result;
use crate::reader::{ImageDecoder, MemoryTileReader, TileReader};
use crate::render::RenderSystem;
use crate::resource::ResourceId;
use crate::view::View;

pub(crate) const ROOT_RESOURCE: &str = "Data/root.tile";

/// Render system that records what it was asked to do.
#[derive(Debug, Default)]
pub(crate) struct MockRender {
    pub textures_created: usize,
    pub graphics_created: usize,
    /// Graphic ids in draw order.
    pub draws: Vec<usize>,
    /// Resources passed to `finish_node`.
    pub finished: Vec<Option<ResourceId>>,
}

impl RenderSystem for MockRender {
    type Texture = usize;
    type Graphic = usize;

    fn create_texture(&mut self, _image: &DecodedImage) -> usize {
        self.textures_created += 1;
        self.textures_created
    }

    fn create_graphic(&mut self, _mesh: &MeshPayload, _texture: Option<&usize>) -> usize {
        self.graphics_created += 1;
        self.graphics_created
    }

    fn draw(&mut self, graphic: &usize) {
        self.draws.push(*graphic);
    }

    fn finish_node(&mut self, resource: Option<&ResourceId>) {
        self.finished.push(resource.cloned());
    }
}

/// View with a constant pixel size that hides spheres by center.
#[derive(Debug, Clone)]
pub(crate) struct MockView {
    pixel_size: f64,
    hidden: Vec<DVec3>,
}

impl MockView {
    pub fn new(pixel_size: f64) -> Self {
        Self {
            pixel_size,
            hidden: Vec::new(),
        }
    }

    pub fn hide(mut self, center: DVec3) -> Self {
        self.hidden.push(center);
        self
    }
}

impl View for MockView {
    fn is_sphere_visible(&self, sphere: &BoundingSphere) -> bool {
        !self.hidden.contains(&sphere.center)
    }

    fn pixel_size_at(&self, _point: DVec3) -> f64 {
        self.pixel_size
    }
}

/// Decoder that turns any texture into opaque 4x4 pixels.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MockDecoder;

impl ImageDecoder for MockDecoder {
    fn decode(&self, _texture: &CompressedTexture) -> DecodeResult<DecodedImage> {
        Ok(DecodedImage::new(vec![u8::MAX; 4 * 4 * 4], 4, 4))
    }
}

/// A textured unit quad scaled by `size`, without normals.
pub(crate) fn textured_mesh(size: f32) -> MeshPayload {
    MeshPayload {
        positions: vec![
            Vec3::ZERO,
            Vec3::new(size, 0.0, 0.0),
            Vec3::new(size, size, 0.0),
            Vec3::new(0.0, size, 0.0),
        ],
        normals: Vec::new(),
        uvs: vec![Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::Y],
        indices: vec![0, 1, 2, 0, 2, 3],
        texture: Some(CompressedTexture {
            format: TextureFormat::Jpeg,
            data: vec![0xFF, 0xD8, 0xFF, 0xE0],
        }),
    }
}

/// Layout of the test dataset.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DatasetShape {
    /// The root tile has a mesh.
    pub root_mesh: bool,
    /// Number of children listed by the root (at most 4).
    pub children: usize,
    /// Child tiles have a mesh.
    pub child_mesh: bool,
    /// Every child lists four displayable grandchildren.
    pub grandchildren: bool,
    /// The root also lists a descriptor without resources.
    pub leaf_descriptor: bool,
    /// The root lists `child_0.tile` twice.
    pub duplicate_child: bool,
}

impl Default for DatasetShape {
    fn default() -> Self {
        Self {
            root_mesh: true,
            children: 4,
            child_mesh: true,
            grandchildren: false,
            leaf_descriptor: false,
            duplicate_child: false,
        }
    }
}

const QUADRANTS: [(f64, f64); 4] = [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (1.0, 1.0)];

pub(crate) fn child_center(index: usize) -> DVec3 {
    let (x, y) = QUADRANTS[index];
    DVec3::new(x * 50.0, y * 50.0, 0.0)
}

/// Root sphere centred at the origin with radius 100 and metric 1.0.
pub(crate) fn root_descriptor() -> NodeDescriptor {
    NodeDescriptor::new(
        "root",
        BoundingSphere::new(DVec3::ZERO, 100.0),
        1.0,
        ROOT_RESOURCE,
    )
}

fn child_descriptor(index: usize) -> NodeDescriptor {
    NodeDescriptor::new(
        format!("child_{index}"),
        BoundingSphere::new(child_center(index), 50.0),
        1.0,
        format!("child_{index}.tile"),
    )
}

fn grandchild_descriptor(child: usize, index: usize) -> NodeDescriptor {
    let (x, y) = QUADRANTS[index];
    NodeDescriptor::new(
        format!("child_{child}_{index}"),
        BoundingSphere::new(child_center(child) + DVec3::new(x * 25.0, y * 25.0, 0.0), 25.0),
        1.0,
        format!("child_{child}_{index}.tile"),
    )
}

fn tile(has_mesh: bool, children: Vec<NodeDescriptor>) -> TileContent {
    TileContent {
        children,
        meshes: if has_mesh {
            vec![textured_mesh(1.0)]
        } else {
            Vec::new()
        },
    }
}

/// Build an in-memory dataset below `Data/`.
pub(crate) fn dataset(shape: DatasetShape) -> Arc<MemoryTileReader> {
    let reader = MemoryTileReader::new();

    let mut root_children: Vec<NodeDescriptor> =
        (0..shape.children).map(child_descriptor).collect();
    if shape.leaf_descriptor {
        let mut leaf = child_descriptor(0);
        leaf.id = "leaf".to_owned();
        leaf.resources.clear();
        root_children.push(leaf);
    }
    if shape.duplicate_child {
        root_children.push(child_descriptor(0));
    }
    reader.insert(
        ResourceId::new(ROOT_RESOURCE),
        tile(shape.root_mesh, root_children),
    );

    for child in 0..shape.children {
        let grandchildren = if shape.grandchildren {
            (0..4).map(|i| grandchild_descriptor(child, i)).collect()
        } else {
            Vec::new()
        };
        reader.insert(
            ResourceId::new(format!("Data/child_{child}.tile")),
            tile(shape.child_mesh, grandchildren),
        );
        if shape.grandchildren {
            for i in 0..4 {
                reader.insert(
                    ResourceId::new(format!("Data/child_{child}_{i}.tile")),
                    tile(true, Vec::new()),
                );
            }
        }
    }

    Arc::new(reader)
}

pub(crate) fn cache_with<T: TileReader + 'static>(
    reader: &Arc<T>,
    config: StreamConfig,
) -> CacheManager {
    CacheManager::new(reader.clone(), Arc::new(MockDecoder), config).unwrap()
}

pub(crate) fn cache_for<T: TileReader + 'static>(reader: &Arc<T>) -> CacheManager {
    cache_with(
        reader,
        StreamConfig::default()
            .with_worker_threads(2)
            .with_poll_interval(Duration::from_millis(1)),
    )
}

/// Reader that can hold every read at a gate, counting reads started.
pub(crate) struct SentinelReader {
    inner: Arc<MemoryTileReader>,
    open: Mutex<bool>,
    gate: Condvar,
    started: AtomicUsize,
}

impl SentinelReader {
    /// Wrap a reader with the gate open.
    pub fn new(inner: Arc<MemoryTileReader>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            open: Mutex::new(true),
            gate: Condvar::new(),
            started: AtomicUsize::new(0),
        })
    }

    pub fn close(&self) {
        *self.open.lock().unwrap() = false;
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.gate.notify_all();
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

impl TileReader for SentinelReader {
    fn read(&self, resource: &ResourceId) -> Result<TileContent> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let open = self.open.lock().unwrap();
        drop(self.gate.wait_while(open, |open| !*open).unwrap());
        self.inner.read(resource)
    }
}

/// Poll `condition` for up to five seconds.
pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
