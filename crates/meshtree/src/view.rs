//! View queries used by the traversal.
//!
//! The tree only asks two questions of a view: is this bounding sphere
//! visible, and how large is one pixel (in dataset units) at this point.

use glam::{DMat4, DVec3};
use meshtree_decode::BoundingSphere;

/// Visibility and resolution queries against the current view.
pub trait View {
    /// Test whether a bounding sphere can contribute to the image.
    fn is_sphere_visible(&self, sphere: &BoundingSphere) -> bool;

    /// Size of one pixel, in dataset units, at a point.
    ///
    /// Returns zero or less when the point is at the eye.
    fn pixel_size_at(&self, point: DVec3) -> f64;
}

/// On-screen diameter of a sphere in pixels for a given pixel size.
#[must_use]
pub fn projected_diameter(sphere: &BoundingSphere, pixel_size: f64) -> f64 {
    if pixel_size <= 0.0 {
        return f64::INFINITY;
    }
    sphere.diameter() / pixel_size
}

/// A frustum for culling nodes based on their bounding spheres.
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    /// Frustum planes (6 planes for a standard view frustum).
    /// Each plane is represented as (normal, distance).
    planes: [(DVec3, f64); 6],
}

impl Frustum {
    /// Create a frustum from a view-projection matrix.
    #[must_use]
    pub fn from_matrix(vp: DMat4) -> Self {
        // Extract frustum planes from view-projection matrix.
        let m = vp.to_cols_array_2d();
        let row = |i: usize| [m[0][i], m[1][i], m[2][i], m[3][i]];
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        let plane = |sign: f64, r: [f64; 4]| {
            Self::normalize_plane(
                r3[0] + sign * r[0],
                r3[1] + sign * r[1],
                r3[2] + sign * r[2],
                r3[3] + sign * r[3],
            )
        };

        // Left, right, bottom, top, near, far planes.
        let planes = [
            plane(1.0, r0),
            plane(-1.0, r0),
            plane(1.0, r1),
            plane(-1.0, r1),
            plane(1.0, r2),
            plane(-1.0, r2),
        ];

        Self { planes }
    }

    fn normalize_plane(a: f64, b: f64, c: f64, d: f64) -> (DVec3, f64) {
        let normal = DVec3::new(a, b, c);
        let length = normal.length();
        if length > 0.0 {
            (normal / length, d / length)
        } else {
            (DVec3::ZERO, 0.0)
        }
    }

    /// Test if a sphere intersects the frustum.
    #[must_use]
    pub fn intersects_sphere(&self, sphere: &BoundingSphere) -> bool {
        self.planes
            .iter()
            .all(|&(normal, distance)| normal.dot(sphere.center) + distance >= -sphere.radius)
    }

    /// Test if a point lies inside the frustum.
    #[must_use]
    pub fn contains_point(&self, point: DVec3) -> bool {
        self.intersects_sphere(&BoundingSphere::new(point, 0.0))
    }
}

/// A perspective camera view.
#[derive(Debug, Clone, Copy)]
pub struct PerspectiveView {
    frustum: Frustum,
    /// Camera position in dataset space.
    camera_position: DVec3,
    /// Pixels per dataset unit at distance 1 from the camera.
    pixels_per_unit: f64,
}

impl PerspectiveView {
    /// Create a view from camera parameters.
    ///
    /// `view_projection` maps dataset space to clip space with a `[0, 1]`
    /// depth range (as produced by `DMat4::perspective_rh`).
    #[must_use]
    pub fn new(
        view_projection: DMat4,
        camera_position: DVec3,
        fov_y: f64,
        viewport_height: f64,
    ) -> Self {
        // pixels_per_unit = viewport_height / (2 * tan(fov_y / 2))
        let pixels_per_unit = viewport_height / (2.0 * (fov_y / 2.0).tan());
        Self {
            frustum: Frustum::from_matrix(view_projection),
            camera_position,
            pixels_per_unit,
        }
    }

    /// Build a view looking from `eye` towards `target`.
    #[must_use]
    pub fn look_at(
        eye: DVec3,
        target: DVec3,
        up: DVec3,
        fov_y: f64,
        viewport: (f64, f64),
        depth: (f64, f64),
    ) -> Self {
        let (width, height) = viewport;
        let (near, far) = depth;
        let projection = DMat4::perspective_rh(fov_y, width / height, near, far);
        let view = DMat4::look_at_rh(eye, target, up);
        Self::new(projection * view, eye, fov_y, height)
    }

    /// Camera position.
    #[must_use]
    pub fn camera_position(&self) -> DVec3 {
        self.camera_position
    }

    /// The culling frustum.
    #[must_use]
    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }
}

impl View for PerspectiveView {
    fn is_sphere_visible(&self, sphere: &BoundingSphere) -> bool {
        self.frustum.intersects_sphere(sphere)
    }

    fn pixel_size_at(&self, point: DVec3) -> f64 {
        self.camera_position.distance(point) / self.pixels_per_unit
    }
}

/// A view with a constant resolution everywhere, for batch extraction.
#[derive(Debug, Clone, Copy)]
pub struct FixedResolutionView {
    resolution: f64,
    bounds: Option<BoundingSphere>,
}

impl FixedResolutionView {
    /// Everything is visible and one pixel spans `resolution` dataset units.
    #[must_use]
    pub fn new(resolution: f64) -> Self {
        Self {
            resolution,
            bounds: None,
        }
    }

    /// Restrict visibility to spheres intersecting `bounds`.
    #[must_use]
    pub fn with_bounds(mut self, bounds: BoundingSphere) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// The fixed resolution.
    #[must_use]
    pub fn resolution(&self) -> f64 {
        self.resolution
    }
}

impl View for FixedResolutionView {
    fn is_sphere_visible(&self, sphere: &BoundingSphere) -> bool {
        self.bounds.is_none_or(|b| {
            b.center.distance(sphere.center) <= b.radius + sphere.radius
        })
    }

    fn pixel_size_at(&self, _point: DVec3) -> f64 {
        self.resolution
    }
}
