//! Payload types and texture decoding for tiled reality meshes.
//!
//! This crate holds the data that crosses the boundary between a tile
//! reader and the streaming tree: node descriptors, parsed tile content,
//! mesh payloads, and textures. All functions are synchronous and can be
//! called from any thread; the caller controls parallelism.
//!
//! # Design principles
//!
//! - **Synchronous**: No async, no threading primitives
//! - **Format-agnostic**: The tile container layout belongs to the reader
//! - **Validated**: Payloads can be checked before they reach the GPU

mod bounds;
mod error;
mod mesh;
pub mod texture;
mod tile;

pub use bounds::{BoundingSphere, Range3};
pub use error::{DecodeError, DecodeResult};
pub use mesh::{MeshPayload, compute_vertex_normals};
pub use texture::{CompressedTexture, DecodedImage, TextureFormat, decode_texture};
pub use tile::{NodeDescriptor, TileContent};
