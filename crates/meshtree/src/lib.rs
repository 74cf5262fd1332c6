//! Streaming level-of-detail tree for tiled reality meshes.
//!
//! This crate keeps the visible part of a very large tiled mesh dataset
//! resident at the right level of detail. A [`Node`] tree mirrors the tile
//! hierarchy and decides each pass what to draw and what to load next; a
//! [`CacheManager`] reads and decodes tiles on background workers and hands
//! the results back to the thread that owns the tree.
//!
//! # Design principles
//!
//! - **Single owner**: Only the consumer thread mutates the tree; workers only read and decode
//! - **Key-routed completions**: A node that goes away can never receive a late result
//! - **Injectable collaborators**: Tile readers, image decoders, render systems and views are traits
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use meshtree::{CacheManager, DrawContext, MemoryTileReader, Node};
//!
//! let cache = CacheManager::with_defaults(Arc::new(reader))?;
//! let mut root = Node::root(root_descriptor);
//! root.load(&cache)?;
//!
//! // Once per frame.
//! cache.process_requests(&mut root);
//! root.draw(&mut DrawContext::interactive(&mut renderer, &view, &cache));
//!
//! // Every few seconds.
//! root.flush_stale(Instant::now() - cache.config().stale_after, &cache);
//! ```

pub mod cache;
mod chunk;
mod config;
mod error;
pub mod export;
pub mod node;
pub mod reader;
mod render;
mod resource;
pub mod view;

#[cfg(test)]
mod test_support;

pub use cache::{CacheManager, CacheStats, LoadRequest, ProcessStats, ViewHint};
pub use chunk::{DecodedMesh, GeometryChunk, LoadedTile};
pub use config::StreamConfig;
pub use error::{Error, Result};
pub use export::{ExportCollector, ExtractedTile, Extraction, Extractor};
pub use node::{DrawContext, DrawMode, DrawStats, LoadState, Node, TreeIssue, TreeStats};
pub use reader::{
    FsTileReader, ImageDecoder, MemoryTileReader, StandardImageDecoder, TileParser, TileReader,
};
pub use render::RenderSystem;
pub use resource::{NodeKey, ResourceId};
pub use view::{FixedResolutionView, Frustum, PerspectiveView, View, projected_diameter};

// Re-export payload types for convenience.
pub use meshtree_decode::{
    BoundingSphere, CompressedTexture, DecodedImage, MeshPayload, NodeDescriptor, TileContent,
};
