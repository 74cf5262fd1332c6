//! Parsed tile content.

use crate::bounds::BoundingSphere;
use crate::error::DecodeResult;
use crate::mesh::MeshPayload;

/// Describes one child of a tile, as listed in the parent's content.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDescriptor {
    /// Identifier of the node within its tile, for logging.
    pub id: String,
    /// Bounding sphere of the child's content.
    pub sphere: BoundingSphere,
    /// Largest on-screen diameter, in pixels, at which the child's own
    /// geometry is detailed enough.
    pub lod_metric: f64,
    /// Tile resources backing the child, relative to the parent's directory.
    pub resources: Vec<String>,
}

impl NodeDescriptor {
    /// Create a descriptor backed by a single resource.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        sphere: BoundingSphere,
        lod_metric: f64,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            sphere,
            lod_metric,
            resources: vec![resource.into()],
        }
    }

    /// Whether the descriptor points at any further content.
    #[must_use]
    pub fn has_resources(&self) -> bool {
        !self.resources.is_empty()
    }

    /// The single resource reference, if there is exactly one.
    #[must_use]
    pub fn single_resource(&self) -> Option<&str> {
        match self.resources.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }
}

/// Everything a tile resource contains.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileContent {
    /// Children that refine this tile.
    pub children: Vec<NodeDescriptor>,
    /// Drawable geometry of the tile itself. Empty for pure subdivision tiles.
    pub meshes: Vec<MeshPayload>,
}

impl TileContent {
    /// Validate every mesh payload.
    pub fn validate(&self) -> DecodeResult<()> {
        self.meshes.iter().try_for_each(MeshPayload::validate)
    }
}
