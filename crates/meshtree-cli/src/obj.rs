//! Wavefront OBJ output for extracted tiles.
//!
//! Each extracted mesh becomes an OBJ group; its texture, when present, is
//! written next to the OBJ as a PNG and referenced from a shared MTL file.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbaImage};
use meshtree::ExtractedTile;

/// Errors while writing an extraction to disk.
#[derive(Debug)]
pub enum ObjError {
    /// The output directory or a file could not be written.
    Io(std::io::Error),
    /// A texture could not be encoded.
    Image(image::ImageError),
    /// A decoded texture's size does not match its dimensions.
    BadTexture {
        /// Group the texture belongs to.
        group: String,
    },
}

impl std::fmt::Display for ObjError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjError::Io(e) => write!(f, "I/O error: {e}"),
            ObjError::Image(e) => write!(f, "texture encoding failed: {e}"),
            ObjError::BadTexture { group } => write!(f, "texture of {group} has invalid size"),
        }
    }
}

impl std::error::Error for ObjError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ObjError::Io(e) => Some(e),
            ObjError::Image(e) => Some(e),
            ObjError::BadTexture { .. } => None,
        }
    }
}

impl From<std::io::Error> for ObjError {
    fn from(e: std::io::Error) -> Self {
        ObjError::Io(e)
    }
}

impl From<image::ImageError> for ObjError {
    fn from(e: image::ImageError) -> Self {
        ObjError::Image(e)
    }
}

/// Write `tiles` as `<name>.obj` and `<name>.mtl` plus PNG textures in `dir`.
///
/// Returns the path of the OBJ file.
pub fn write_obj(dir: &Path, name: &str, tiles: &[ExtractedTile]) -> Result<PathBuf, ObjError> {
    fs::create_dir_all(dir)?;

    let mut obj = String::new();
    let mut mtl = String::new();
    let _ = writeln!(obj, "mtllib {name}.mtl");

    // OBJ indices are 1-based and global across groups.
    let mut vertex_base = 1_usize;
    for (t, tile) in tiles.iter().enumerate() {
        for (m, (mesh, texture)) in tile.geometries.iter().zip(&tile.textures).enumerate() {
            let group = format!("tile{}_{}_{t}_{m}", tile.tile_x, tile.tile_y);
            let _ = writeln!(obj, "g {group}");

            if let Some(image) = texture {
                let buffer = RgbaImage::from_raw(image.width, image.height, image.data.clone())
                    .ok_or_else(|| ObjError::BadTexture {
                        group: group.clone(),
                    })?;
                let file = format!("{group}.png");
                buffer.save_with_format(dir.join(&file), ImageFormat::Png)?;
                let _ = writeln!(mtl, "newmtl {group}\nmap_Kd {file}\n");
                let _ = writeln!(obj, "usemtl {group}");
            }

            for p in &mesh.positions {
                let _ = writeln!(obj, "v {} {} {}", p.x, p.y, p.z);
            }
            for uv in &mesh.uvs {
                let _ = writeln!(obj, "vt {} {}", uv.x, uv.y);
            }
            for n in &mesh.normals {
                let _ = writeln!(obj, "vn {} {} {}", n.x, n.y, n.z);
            }

            let has_uvs = mesh.uvs.len() == mesh.positions.len();
            let has_normals = mesh.normals.len() == mesh.positions.len();
            for tri in mesh.indices.chunks_exact(3) {
                obj.push('f');
                for &index in tri {
                    let i = vertex_base + index as usize;
                    match (has_uvs, has_normals) {
                        (true, true) => {
                            let _ = write!(obj, " {i}/{i}/{i}");
                        }
                        (true, false) => {
                            let _ = write!(obj, " {i}/{i}");
                        }
                        (false, true) => {
                            let _ = write!(obj, " {i}//{i}");
                        }
                        (false, false) => {
                            let _ = write!(obj, " {i}");
                        }
                    }
                }
                obj.push('\n');
            }

            vertex_base += mesh.positions.len();
        }
    }

    let obj_path = dir.join(format!("{name}.obj"));
    fs::write(&obj_path, obj)?;
    fs::write(dir.join(format!("{name}.mtl")), mtl)?;
    Ok(obj_path)
}
