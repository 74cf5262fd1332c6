//! Command-line driver for the streaming mesh tree.
//!
//! Generates a procedural tiled terrain and either flies a headless camera
//! over it (the interactive streaming loop), extracts it at a fixed
//! resolution, or loads it and reports on the resulting tree.

mod counting;
mod flight;
mod obj;
mod terrain;

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use glam::DVec3;
use meshtree::{
    BoundingSphere, CacheManager, Extractor, Node, RenderSystem, StandardImageDecoder,
    StreamConfig,
};

use counting::CountingRenderer;
use flight::FlightPlan;
use obj::ObjError;
use terrain::TerrainConfig;

#[derive(Parser)]
#[command(about = "Stream, extract and inspect tiled reality meshes")]
struct CliArgs {
    #[command(flatten)]
    terrain: TerrainArgs,

    #[command(flatten)]
    stream: StreamArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct TerrainArgs {
    /// Subdivision levels below the root tile.
    #[arg(long, default_value_t = 4)]
    depth: u32,

    /// Side length of the dataset.
    #[arg(long, default_value_t = 10_000.0)]
    extent: f64,

    /// Largest terrain height.
    #[arg(long, default_value_t = 400.0)]
    amplitude: f64,

    /// Texture pixels per tile side.
    #[arg(long, default_value_t = 32)]
    texture_size: u32,

    /// On-screen diameter in pixels up to which a tile is detailed enough.
    #[arg(long, default_value_t = 256.0)]
    lod_metric: f64,

    /// Give the root tile no geometry of its own.
    #[arg(long)]
    subdivision_root: bool,
}

#[derive(Args)]
struct StreamArgs {
    /// Background loader threads.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Seconds after which an unvisited tile may be evicted.
    #[arg(long, default_value_t = 2.0)]
    stale_after: f64,

    /// Drop compressed textures once uploaded.
    #[arg(long)]
    release_compressed: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Fly a headless camera over the dataset.
    Fly {
        /// Frames to simulate.
        #[arg(long, default_value_t = 600)]
        frames: u32,

        /// Milliseconds per frame.
        #[arg(long, default_value_t = 16)]
        frame_ms: u64,

        /// Frames between stale-tile flushes.
        #[arg(long, default_value_t = 60)]
        flush_every: u32,
    },
    /// Extract geometry at a fixed resolution.
    Extract {
        /// Dataset units per pixel.
        #[arg(long, default_value_t = 20.0)]
        resolution: f64,

        /// Output tile column recorded on extracted tiles.
        #[arg(long, default_value_t = 0)]
        tile_x: i32,

        /// Output tile row recorded on extracted tiles.
        #[arg(long, default_value_t = 0)]
        tile_y: i32,

        /// Only extract around this point, as `x,y,radius`.
        #[arg(long, value_parser = parse_bounds)]
        bounds: Option<BoundingSphere>,

        /// Write an OBJ with PNG textures into this directory.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Load the root until fully displayable and report on the tree.
    Inspect,
}

/// Parse an `x,y,radius` triple into a sphere on the ground plane.
fn parse_bounds(s: &str) -> Result<BoundingSphere, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [x, y, radius] = parts.as_slice() else {
        return Err(format!("expected x,y,radius, got '{s}'"));
    };
    let x = x.parse::<f64>().map_err(|e| format!("invalid x: {e}"))?;
    let y = y.parse::<f64>().map_err(|e| format!("invalid y: {e}"))?;
    let radius = radius
        .parse::<f64>()
        .map_err(|e| format!("invalid radius: {e}"))?;
    if radius <= 0.0 {
        return Err(format!("radius must be positive, got {radius}"));
    }
    Ok(BoundingSphere::new(DVec3::new(x, y, 0.0), radius))
}

#[derive(Debug)]
enum CliError {
    Terrain(image::ImageError),
    Tree(meshtree::Error),
    Output(ObjError),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Terrain(e) => write!(f, "terrain generation failed: {e}"),
            CliError::Tree(e) => write!(f, "{e}"),
            CliError::Output(e) => write!(f, "writing output failed: {e}"),
        }
    }
}

impl From<image::ImageError> for CliError {
    fn from(e: image::ImageError) -> Self {
        CliError::Terrain(e)
    }
}

impl From<meshtree::Error> for CliError {
    fn from(e: meshtree::Error) -> Self {
        CliError::Tree(e)
    }
}

impl From<ObjError> for CliError {
    fn from(e: ObjError) -> Self {
        CliError::Output(e)
    }
}

impl TerrainArgs {
    fn config(&self) -> TerrainConfig {
        TerrainConfig {
            depth: self.depth,
            extent: self.extent,
            amplitude: self.amplitude,
            texture_size: self.texture_size,
            lod_metric: self.lod_metric,
            subdivision_root: self.subdivision_root,
            ..TerrainConfig::default()
        }
    }
}

impl StreamArgs {
    fn config(&self) -> StreamConfig {
        StreamConfig::default()
            .with_worker_threads(self.workers)
            .with_stale_after(Duration::from_secs_f64(self.stale_after.max(0.0)))
            .with_keep_compressed_textures(!self.release_compressed)
    }
}

fn log_tree<R: RenderSystem>(root: &Node<R>, cache: &CacheManager) {
    let tree = root.stats();
    let requests = cache.stats();
    tracing::info!(
        loaded = tree.loaded_nodes,
        total = tree.total_nodes,
        depth = tree.depth,
        chunks = tree.chunks,
        cached_chunks = tree.cached_chunks,
        mesh_kb = tree.mesh_bytes / 1024,
        texture_kb = tree.texture_bytes / 1024,
        "Tree"
    );
    tracing::info!(
        requested = requests.requested,
        completed = requests.completed,
        failed = requests.failed,
        cancelled = requests.cancelled,
        discarded = requests.discarded,
        "Requests"
    );
    let issues = root.validate();
    if issues.is_empty() {
        tracing::info!("Tree is consistent");
    }
    for issue in &issues {
        tracing::warn!("{issue}");
    }
}

fn run(args: &CliArgs) -> Result<(), CliError> {
    let terrain_config = args.terrain.config();
    let terrain = terrain_config.generate()?;
    let cache = CacheManager::new(
        terrain.reader.clone(),
        std::sync::Arc::new(StandardImageDecoder),
        args.stream.config(),
    )?;

    match &args.command {
        Command::Fly {
            frames,
            frame_ms,
            flush_every,
        } => {
            let plan = FlightPlan {
                frames: *frames,
                frame_interval: Duration::from_millis(*frame_ms),
                flush_every: *flush_every,
                ..FlightPlan::default()
            };
            let mut root = Node::root(terrain.root.clone());
            root.load(&cache)?;

            let mut renderer = CountingRenderer::default();
            let report = plan.fly(&terrain_config, &mut root, &cache, &mut renderer);
            let total = renderer.total();
            tracing::info!(
                frames = renderer.frames(),
                integrated = report.integrated,
                failed = report.failed,
                discarded = report.discarded,
                flushed = report.flushed,
                peak_loaded = report.peak_loaded,
                final_loaded = report.final_loaded,
                uploads = total.textures_uploaded,
                draw_calls = total.draw_calls,
                "Flight finished"
            );
            log_tree(&root, &cache);
        }
        Command::Extract {
            resolution,
            tile_x,
            tile_y,
            bounds,
            output,
        } => {
            let mut extractor = Extractor::new(*resolution);
            if let Some(bounds) = bounds {
                extractor = extractor.with_bounds(*bounds);
            }
            let mut root = Node::root(terrain.root.clone());
            let extraction = extractor.extract(&mut root, *tile_x, *tile_y, &cache)?;

            let triangles: usize = extraction
                .tiles
                .iter()
                .map(meshtree::ExtractedTile::triangle_count)
                .sum();
            tracing::info!(
                tiles = extraction.tiles.len(),
                triangles,
                visited = extraction.stats.visited,
                evicted = extraction.stats.evicted,
                remaining = root.node_count(),
                "Extracted"
            );

            if let Some(dir) = output {
                let name = format!("extract_{tile_x}_{tile_y}");
                let path = obj::write_obj(dir, &name, &extraction.tiles)?;
                tracing::info!(path = %path.display(), "Wrote OBJ");
            }
        }
        Command::Inspect => {
            let mut root: Node<CountingRenderer> = Node::root(terrain.root.clone());
            root.load_until_fully_displayable(&cache)?;
            let duplicates = root.find_duplicate_resources();
            if !duplicates.is_empty() {
                tracing::warn!(count = duplicates.len(), "Duplicate resources");
            }
            log_tree(&root, &cache);
        }
    }

    cache.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    let args = CliArgs::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
