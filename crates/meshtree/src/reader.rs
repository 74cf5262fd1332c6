//! Tile reader and image decoder boundaries.
//!
//! The streaming tree never interprets tile bytes itself. A [`TileReader`]
//! turns a resource id into parsed [`TileContent`], and an [`ImageDecoder`]
//! turns compressed textures into pixels. Both run on background workers,
//! so implementations must be `Send + Sync`.
//!
//! # Implementations
//!
//! - [`MemoryTileReader`]: Tiles held in memory, keyed by resource id
//! - [`FsTileReader`]: Reads bytes from a directory and delegates to a [`TileParser`]
//! - [`StandardImageDecoder`]: JPEG/PNG decoding

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use meshtree_decode::{CompressedTexture, DecodeResult, DecodedImage, TileContent};

use crate::error::{Error, Result};
use crate::resource::ResourceId;

/// Produces parsed tile content for a resource.
pub trait TileReader: Send + Sync {
    /// Read and parse a resource.
    ///
    /// Returns [`Error::ResourceNotFound`] if the resource does not exist and
    /// [`Error::Parse`] if it cannot be understood.
    fn read(&self, resource: &ResourceId) -> Result<TileContent>;
}

/// Parses the bytes of one tile container.
pub trait TileParser: Send + Sync {
    /// Parse raw bytes read for `resource`.
    fn parse(&self, resource: &ResourceId, bytes: &[u8]) -> Result<TileContent>;
}

/// Decodes compressed textures to RGBA pixels.
pub trait ImageDecoder: Send + Sync {
    /// Decode one texture.
    fn decode(&self, texture: &CompressedTexture) -> DecodeResult<DecodedImage>;
}

/// Decoder for the JPEG and PNG textures found in tiles.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardImageDecoder;

impl ImageDecoder for StandardImageDecoder {
    fn decode(&self, texture: &CompressedTexture) -> DecodeResult<DecodedImage> {
        meshtree_decode::decode_texture(texture)
    }
}

/// A reader over tiles held in memory.
///
/// Useful for procedurally generated datasets and for tests. Every read
/// returns a copy, so the store behaves like persistent backing storage:
/// evicted nodes can be rebuilt from it at any time.
#[derive(Debug, Default)]
pub struct MemoryTileReader {
    tiles: RwLock<HashMap<ResourceId, TileContent>>,
    reads: AtomicUsize,
}

impl MemoryTileReader {
    /// Create an empty reader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a tile.
    pub fn insert(&self, resource: ResourceId, content: TileContent) {
        self.tiles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource, content);
    }

    /// Remove a tile, returning its content.
    pub fn remove(&self, resource: &ResourceId) -> Option<TileContent> {
        self.tiles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(resource)
    }

    /// Number of stored tiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if the reader holds no tiles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of reads served so far, including failed ones.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl FromIterator<(ResourceId, TileContent)> for MemoryTileReader {
    fn from_iter<I: IntoIterator<Item = (ResourceId, TileContent)>>(iter: I) -> Self {
        Self {
            tiles: RwLock::new(iter.into_iter().collect()),
            reads: AtomicUsize::new(0),
        }
    }
}

impl TileReader for MemoryTileReader {
    fn read(&self, resource: &ResourceId) -> Result<TileContent> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.tiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                resource: resource.clone(),
            })
    }
}

/// A reader over tile files below a root directory.
#[derive(Debug, Clone)]
pub struct FsTileReader<P> {
    root: PathBuf,
    parser: P,
}

impl<P: TileParser> FsTileReader<P> {
    /// Create a reader rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, parser: P) -> Self {
        Self {
            root: root.into(),
            parser,
        }
    }

    /// The dataset root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of a resource.
    ///
    /// Returns `None` for resources that would leave the root directory, such
    /// as ids with leading `..` segments.
    #[must_use]
    pub fn path_of(&self, resource: &ResourceId) -> Option<PathBuf> {
        let relative = Path::new(resource.as_str());
        relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
            .then(|| self.root.join(relative))
    }
}

impl<P: TileParser> TileReader for FsTileReader<P> {
    fn read(&self, resource: &ResourceId) -> Result<TileContent> {
        let Some(path) = self.path_of(resource) else {
            tracing::warn!(resource = %resource, "Resource lies outside the dataset root");
            return Err(Error::ResourceNotFound {
                resource: resource.clone(),
            });
        };
        tracing::trace!(path = %path.display(), "reading tile");

        let bytes = std::fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::ResourceNotFound {
                resource: resource.clone(),
            },
            _ => Error::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            },
        })?;

        self.parser.parse(resource, &bytes)
    }
}
