//! Headless fly-through: the interactive frame loop without a window.
//!
//! The camera spirals down from above the whole dataset towards the ground,
//! so the tree starts coarse, refines as the camera descends and sheds the
//! tiles it leaves behind.

use std::f64::consts::TAU;
use std::time::Duration;

use glam::DVec3;
use meshtree::{CacheManager, DrawContext, Node, PerspectiveView};
use web_time::Instant;

use crate::counting::CountingRenderer;
use crate::terrain::TerrainConfig;

/// Parameters of one flight.
#[derive(Debug, Clone, Copy)]
pub struct FlightPlan {
    /// Frames to simulate.
    pub frames: u32,
    /// Wall-clock time per frame.
    pub frame_interval: Duration,
    /// Frames between stale-tile flushes.
    pub flush_every: u32,
    /// Viewport in pixels.
    pub viewport: (f64, f64),
    /// Vertical field of view in radians.
    pub fov_y: f64,
}

impl Default for FlightPlan {
    fn default() -> Self {
        Self {
            frames: 600,
            frame_interval: Duration::from_millis(16),
            flush_every: 60,
            viewport: (1280.0, 720.0),
            fov_y: std::f64::consts::FRAC_PI_4,
        }
    }
}

/// What a flight did, summed over all frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlightReport {
    /// Tiles integrated from background loads.
    pub integrated: usize,
    /// Background loads that failed.
    pub failed: usize,
    /// Completions dropped because their node went away.
    pub discarded: usize,
    /// Nodes evicted by stale flushes.
    pub flushed: usize,
    /// Largest number of loaded nodes seen after a frame.
    pub peak_loaded: usize,
    /// Loaded nodes after the last frame.
    pub final_loaded: usize,
}

impl FlightPlan {
    /// Camera position and look-at target at progress `t` in `[0, 1]`.
    fn camera(&self, terrain: &TerrainConfig, t: f64) -> (DVec3, DVec3) {
        let orbit = terrain.extent * 0.35 * (1.0 - 0.5 * t);
        let angle = TAU * 1.5 * t;
        let x = orbit * angle.cos();
        let y = orbit * angle.sin();
        let ground = terrain.height(x, y);
        let altitude = terrain.extent * (1.0 - t).powi(2) + terrain.amplitude * 0.5;
        let eye = DVec3::new(x, y, ground.max(0.0) + altitude);
        // Look ahead along the spiral and slightly down.
        let ahead = angle + 0.3;
        let target = DVec3::new(orbit * ahead.cos(), orbit * ahead.sin(), ground);
        (eye, target)
    }

    /// Fly over the tree under `root`, drawing into `renderer`.
    pub fn fly(
        &self,
        terrain: &TerrainConfig,
        root: &mut Node<CountingRenderer>,
        cache: &CacheManager,
        renderer: &mut CountingRenderer,
    ) -> FlightReport {
        let mut report = FlightReport::default();
        let frames = self.frames.max(1);

        for frame in 0..frames {
            let started = Instant::now();
            let t = f64::from(frame) / f64::from(frames);
            let (eye, target) = self.camera(terrain, t);
            let view = PerspectiveView::look_at(
                eye,
                target,
                DVec3::Z,
                self.fov_y,
                self.viewport,
                (1.0, terrain.extent * 4.0),
            );

            let processed = cache.process_requests(root);
            report.integrated += processed.integrated;
            report.failed += processed.failed;
            report.discarded += processed.discarded;

            let draw = root.draw(&mut DrawContext::interactive(renderer, &view, cache));
            let counters = renderer.end_frame();

            if self.flush_every > 0 && frame % self.flush_every == self.flush_every - 1 {
                if let Some(cutoff) = Instant::now().checked_sub(cache.config().stale_after) {
                    let flushed = root.flush_stale(cutoff, cache);
                    report.flushed += flushed;
                    if flushed > 0 {
                        tracing::debug!(frame, flushed, "Flushed stale tiles");
                    }
                }
            }

            let loaded = root.node_count();
            report.peak_loaded = report.peak_loaded.max(loaded);
            tracing::trace!(
                frame,
                altitude = eye.z,
                visited = draw.visited,
                drawn = draw.nodes_drawn,
                queued = draw.children_queued,
                triangles = counters.triangles,
                uploads = counters.textures_uploaded,
                loaded,
                pending = cache.pending_count(),
                "Frame"
            );

            if let Some(rest) = self.frame_interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }

        report.final_loaded = root.node_count();
        report
    }
}
